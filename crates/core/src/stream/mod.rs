//! Per-source capture sessions.

mod session;
mod state;

use watcher_protocol::{Observation, StreamInfo};

pub use session::{SessionOptions, SessionSnapshot, StreamSession};
pub use state::{StallPolicy, StreamState, StreamStateMachine, Transition};

/// Where a session delivers what it captures.
///
/// Implemented by [`UplinkChannel`](crate::UplinkChannel). All methods are
/// synchronous and must not block.
pub trait ObservationSink: Send + Sync {
	fn submit(&self, observation: Observation);

	/// Registers or refreshes the source context attached to batches.
	fn update_stream(&self, info: StreamInfo);

	fn remove_stream(&self, stream_id: &str);
}

//! Reliable, batched delivery of observations to the Brain.

mod channel;
mod queue;
mod reconnect;

pub use channel::{FlushOutcome, UplinkChannel, UplinkOptions, UplinkStats};
pub use queue::{InFlightBatches, ObservationQueue};
pub use reconnect::ReconnectPolicy;

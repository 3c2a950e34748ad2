//! Wire and data types for the stream watcher.
//!
//! Nothing in this crate performs I/O. The types describe:
//!
//! - [`Source`] - a configured video source and its rotation priority
//! - [`Observation`] / [`ObservationBatch`] - capture records and their uplink grouping
//! - [`AgentMessage`] / [`BrainMessage`] - the JSON envelope spoken over the uplink
//! - [`StatusReport`] - the periodic aggregate pushed to the Brain

pub mod messages;
pub mod observation;
pub mod source;

pub use messages::{AgentMessage, AgentState, BrainMessage, Command, StatusReport, AGENT_TYPE};
pub use observation::{BoundingBox, Detection, Observation, ObservationBatch, StreamInfo};
pub use source::{Source, SourceType};

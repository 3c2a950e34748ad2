//! Uplink message envelope.
//!
//! Every message is a JSON object tagged by a `type` field:
//!
//! 1. Watcher connects and sends [`AgentMessage::Auth`]
//! 2. Brain answers [`BrainMessage::AuthSuccess`] or [`BrainMessage::AuthError`]
//! 3. Watcher streams [`AgentMessage::Observations`], Brain acknowledges each batch
//! 4. Watcher pushes [`AgentMessage::Status`] periodically
//! 5. Brain may send [`BrainMessage::Command`] at any time
//!
//! The command kind travels in a `command` field because `type` is the
//! envelope discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observation::ObservationBatch;

/// Agent type announced during authentication.
pub const AGENT_TYPE: &str = "watcher";

/// Message sent from the watcher to the Brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentMessage {
	Auth {
		agent_type: String,
		api_key: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		agent_id: Option<String>,
		version: String,
	},
	Observations(ObservationBatch),
	Status(StatusReport),
}

/// Message sent from the Brain to the watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BrainMessage {
	AuthSuccess {
		agent_id: String,
		#[serde(default)]
		session_token: Option<String>,
	},
	AuthError {
		error: String,
		#[serde(default)]
		code: Option<String>,
	},
	ObservationsAck {
		batch_id: String,
		#[serde(default)]
		received: usize,
	},
	ObservationsError {
		batch_id: String,
		error: String,
	},
	Command(Command),
}

/// Instruction from the Brain. Surfaced to the embedding application as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
	pub command_id: String,
	pub command: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
}

/// Coarse health of the watcher as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
	/// All stream slots are filled and the uplink is connected.
	Watching,
	/// Fewer streams than configured, or the uplink is down.
	Degraded,
	Stopping,
}

/// Periodic aggregate pushed to the Brain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
	pub agent_id: Option<String>,
	pub state: AgentState,
	pub active_streams: usize,
	pub total_frames_captured: u64,
	pub total_observations_sent: u64,
	pub uplink_connected: bool,
	pub queued_observations: usize,
	pub timestamp: DateTime<Utc>,
}

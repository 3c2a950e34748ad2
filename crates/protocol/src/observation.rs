//! Capture records and the batches that carry them upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::SourceType;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
	pub x: f32,
	pub y: f32,
	pub width: f32,
	pub height: f32,
}

/// Something a frame analyzer recognised in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
	pub label: String,
	pub confidence: f32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bbox: Option<BoundingBox>,
}

/// One capture record produced by a stream's capture tick.
///
/// `frame_id` starts at 1 and increases by exactly one per successful
/// capture within a stream. Player-derived fields are present when the
/// page exposed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
	pub stream_id: String,
	pub frame_id: u64,
	pub captured_at: DateTime<Utc>,
	pub frame_width: u32,
	pub frame_height: u32,
	#[serde(default)]
	pub detections: Vec<Detection>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub video_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub video_title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub current_time: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub duration: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category: Option<String>,
	/// Base64 encoded frame, only populated when frame upload is enabled.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frame: Option<String>,
}

/// Source context for one stream contributing to a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
	pub stream_id: String,
	#[serde(rename = "type")]
	pub kind: SourceType,
	pub url: String,
	pub category: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub video_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
}

/// A group of observations shipped as one uplink transmission.
///
/// Built at flush time and never mutated afterwards. A batch that fails to
/// send has its observations returned to the front of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationBatch {
	pub agent_id: String,
	pub batch_id: Uuid,
	pub observations: Vec<Observation>,
	/// One entry per distinct stream in `observations`, in first-appearance order.
	#[serde(default)]
	pub stream_info: Vec<StreamInfo>,
}

impl ObservationBatch {
	pub fn len(&self) -> usize {
		self.observations.len()
	}

	pub fn is_empty(&self) -> bool {
		self.observations.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn observation(frame_id: u64) -> Observation {
		Observation {
			stream_id: "s-1".into(),
			frame_id,
			captured_at: Utc::now(),
			frame_width: 1280,
			frame_height: 720,
			detections: vec![],
			video_id: Some("abc".into()),
			video_title: None,
			current_time: Some(12.5),
			duration: None,
			category: None,
			frame: None,
		}
	}

	#[test]
	fn observation_uses_camel_case_and_omits_absent_fields() {
		let json = serde_json::to_value(observation(7)).unwrap();
		assert_eq!(json["streamId"], "s-1");
		assert_eq!(json["frameId"], 7);
		assert_eq!(json["frameWidth"], 1280);
		assert_eq!(json["videoId"], "abc");
		assert!(json.get("videoTitle").is_none());
		assert!(json.get("frame").is_none());
	}

	#[test]
	fn batch_serializes_stream_info_list() {
		let batch = ObservationBatch {
			agent_id: "agent-1".into(),
			batch_id: Uuid::new_v4(),
			observations: vec![observation(1), observation(2)],
			stream_info: vec![StreamInfo {
				stream_id: "s-1".into(),
				kind: SourceType::Playlist,
				url: "https://example.com/p".into(),
				category: "music".into(),
				video_id: None,
				title: Some("Mix".into()),
			}],
		};
		let json = serde_json::to_value(&batch).unwrap();
		assert_eq!(json["agentId"], "agent-1");
		assert_eq!(json["observations"].as_array().unwrap().len(), 2);
		assert_eq!(json["streamInfo"][0]["type"], "playlist");
		assert_eq!(batch.len(), 2);
	}
}

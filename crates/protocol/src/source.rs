//! Configured video sources.

use serde::{Deserialize, Serialize};

/// Kind of page a [`Source`] points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
	/// A single video or live stream page.
	#[default]
	Video,
	/// A playlist; the player advances on its own.
	Playlist,
	/// A channel page whose live or latest upload is played.
	Channel,
}

impl SourceType {
	pub fn as_str(&self) -> &'static str {
		match self {
			SourceType::Video => "video",
			SourceType::Playlist => "playlist",
			SourceType::Channel => "channel",
		}
	}
}

impl std::fmt::Display for SourceType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A video source from configuration.
///
/// Sources carry no generated identity: they are identified by their
/// position in the rotation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
	pub name: String,
	pub url: String,
	#[serde(rename = "type", default)]
	pub kind: SourceType,
	/// Lower values are watched first in priority rotation.
	#[serde(default)]
	pub priority: i32,
	#[serde(default)]
	pub category: String,
}

impl Source {
	pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			url: url.into(),
			kind: SourceType::default(),
			priority: 0,
			category: String::new(),
		}
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_kind(mut self, kind: SourceType) -> Self {
		self.kind = kind;
		self
	}

	pub fn with_category(mut self, category: impl Into<String>) -> Self {
		self.category = category.into();
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn source_type_defaults_to_video() {
		let source: Source =
			serde_json::from_str(r#"{"name":"a","url":"https://example.com/live"}"#).unwrap();
		assert_eq!(source.kind, SourceType::Video);
		assert_eq!(source.priority, 0);
		assert!(source.category.is_empty());
	}

	#[test]
	fn source_type_uses_type_key() {
		let source: Source = serde_json::from_str(
			r#"{"name":"a","url":"https://example.com/c","type":"channel","priority":2,"category":"news"}"#,
		)
		.unwrap();
		assert_eq!(source.kind, SourceType::Channel);
		assert_eq!(source.priority, 2);

		let json = serde_json::to_string(&source).unwrap();
		assert!(json.contains(r#""type":"channel""#));
	}
}

//! Append-only store of derived insights with content deduplication.
//!
//! Insights are kept one JSON object per line. Two insights are duplicates
//! when they share a kind and their content matches after case folding and
//! whitespace collapsing; duplicates are not written.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
	pub kind: String,
	pub content: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confidence: Option<f32>,
	pub created_at: DateTime<Utc>,
}

impl Insight {
	pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			kind: kind.into(),
			content: content.into(),
			stream_id: None,
			source: None,
			confidence: None,
			created_at: Utc::now(),
		}
	}

	pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
		self.stream_id = Some(stream_id.into());
		self
	}

	pub fn with_source(mut self, source: impl Into<String>) -> Self {
		self.source = Some(source.into());
		self
	}

	pub fn with_confidence(mut self, confidence: f32) -> Self {
		self.confidence = Some(confidence);
		self
	}

	fn dedup_key(&self) -> (String, String) {
		(self.kind.to_lowercase(), normalize(&self.content))
	}
}

fn normalize(content: &str) -> String {
	content
		.split_whitespace()
		.collect::<Vec<_>>()
		.join(" ")
		.to_lowercase()
}

pub struct InsightStore {
	path: PathBuf,
	file: File,
	seen: HashSet<(String, String)>,
	len: usize,
}

impl InsightStore {
	/// Opens or creates the store at `path`, loading existing entries.
	///
	/// Lines that do not parse are skipped with a warning.
	pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref().to_path_buf();
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await?;
		}

		let mut seen = HashSet::new();
		let mut len = 0;
		if tokio::fs::try_exists(&path).await? {
			let mut lines = BufReader::new(File::open(&path).await?).lines();
			let mut line_no = 0;
			while let Some(line) = lines.next_line().await? {
				line_no += 1;
				if line.trim().is_empty() {
					continue;
				}
				match serde_json::from_str::<Insight>(&line) {
					Ok(insight) => {
						if seen.insert(insight.dedup_key()) {
							len += 1;
						}
					}
					Err(e) => tracing::warn!(
						target: "watcher.insights",
						path = %path.display(),
						line = line_no,
						error = %e,
						"skipping malformed insight"
					),
				}
			}
		}

		let file = OpenOptions::new().create(true).append(true).open(&path).await?;
		tracing::debug!(target: "watcher.insights", path = %path.display(), entries = len, "insight store opened");
		Ok(Self {
			path,
			file,
			seen,
			len,
		})
	}

	/// Appends `insight` unless an equivalent one exists. Returns whether it was written.
	pub async fn record(&mut self, insight: &Insight) -> Result<bool> {
		let key = insight.dedup_key();
		if self.seen.contains(&key) {
			return Ok(false);
		}
		let mut line = serde_json::to_string(insight)?;
		line.push('\n');
		self.file.write_all(line.as_bytes()).await?;
		self.file.flush().await?;
		self.seen.insert(key);
		self.len += 1;
		Ok(true)
	}

	pub fn contains(&self, kind: &str, content: &str) -> bool {
		self.seen.contains(&(kind.to_lowercase(), normalize(content)))
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn duplicates_are_not_written() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = InsightStore::open(dir.path().join("insights.jsonl")).await.unwrap();

		assert!(store.record(&Insight::new("scene", "A red car parks")).await.unwrap());
		assert!(!store.record(&Insight::new("scene", "  a RED car   parks ")).await.unwrap());
		assert!(store.record(&Insight::new("object", "A red car parks")).await.unwrap());
		assert_eq!(store.len(), 2);
		assert!(store.contains("Scene", "a red car parks"));
	}

	#[tokio::test]
	async fn reopening_restores_dedup_state() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("insights.jsonl");
		{
			let mut store = InsightStore::open(&path).await.unwrap();
			store
				.record(&Insight::new("scene", "sunset over harbor").with_stream("stream-1").with_confidence(0.8))
				.await
				.unwrap();
		}

		let mut store = InsightStore::open(&path).await.unwrap();
		assert_eq!(store.len(), 1);
		assert!(!store.record(&Insight::new("scene", "Sunset over harbor")).await.unwrap());
	}

	#[tokio::test]
	async fn malformed_lines_are_skipped() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("insights.jsonl");
		let good = serde_json::to_string(&Insight::new("scene", "crowd gathers")).unwrap();
		tokio::fs::write(&path, format!("{{not json\n\n{good}\n")).await.unwrap();

		let store = InsightStore::open(&path).await.unwrap();
		assert_eq!(store.len(), 1);
		assert!(store.contains("scene", "crowd gathers"));
	}
}

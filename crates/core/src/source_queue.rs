//! Rotation order over the configured sources.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use watcher_protocol::Source;

/// How the rotation order is derived from configuration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationMode {
	/// Stable ascending sort on `priority`.
	#[default]
	Priority,
	Sequential,
	/// One shuffle at construction, never again.
	Random,
}

impl RotationMode {
	pub fn as_str(self) -> &'static str {
		match self {
			RotationMode::Priority => "priority",
			RotationMode::Sequential => "sequential",
			RotationMode::Random => "random",
		}
	}
}

impl std::fmt::Display for RotationMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Fixed ordering of sources plus a cursor that wraps forever.
///
/// The order is computed once; [`next_source`](Self::next_source) only moves
/// the cursor.
#[derive(Debug, Clone)]
pub struct SourceQueue {
	order: Vec<Source>,
	cursor: usize,
	mode: RotationMode,
}

impl SourceQueue {
	pub fn new(sources: Vec<Source>, mode: RotationMode, seed: Option<u64>) -> Self {
		let mut order = sources;
		match mode {
			RotationMode::Priority => order.sort_by_key(|s| s.priority),
			RotationMode::Sequential => {}
			RotationMode::Random => {
				let mut rng = match seed {
					Some(seed) => StdRng::seed_from_u64(seed),
					None => StdRng::from_entropy(),
				};
				order.shuffle(&mut rng);
			}
		}
		Self {
			order,
			cursor: 0,
			mode,
		}
	}

	/// Source under the cursor, advancing it by one. `None` only when empty.
	pub fn next_source(&mut self) -> Option<Source> {
		if self.order.is_empty() {
			return None;
		}
		let source = self.order[self.cursor].clone();
		self.cursor = (self.cursor + 1) % self.order.len();
		Some(source)
	}

	pub fn order(&self) -> &[Source] {
		&self.order
	}

	pub fn cursor(&self) -> usize {
		self.cursor
	}

	pub fn mode(&self) -> RotationMode {
		self.mode
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}
}

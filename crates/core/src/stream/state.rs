use serde::{Deserialize, Serialize};

use crate::browser::PlaybackState;

/// Lifecycle of a [`StreamSession`](super::StreamSession).
///
/// ```text
/// starting ──▶ playing ◀──▶ buffering
///                 │  ▲          │
///                 ▼  │          ▼
///                stalled ◀──────┘
///
/// any ──▶ error | stopped   (both terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
	Starting,
	Playing,
	Buffering,
	Stalled,
	Error,
	Stopped,
}

impl StreamState {
	pub fn is_terminal(self) -> bool {
		matches!(self, StreamState::Error | StreamState::Stopped)
	}

	pub fn can_transition_to(self, next: StreamState) -> bool {
		use StreamState::*;
		match (self, next) {
			(Error | Stopped, _) => false,
			(_, Error | Stopped) => true,
			(Starting, Playing) => true,
			(Playing, Buffering) | (Buffering, Playing) => true,
			(Playing | Buffering, Stalled) => true,
			(Stalled, Playing | Buffering) => true,
			_ => false,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			StreamState::Starting => "starting",
			StreamState::Playing => "playing",
			StreamState::Buffering => "buffering",
			StreamState::Stalled => "stalled",
			StreamState::Error => "error",
			StreamState::Stopped => "stopped",
		}
	}
}

impl std::fmt::Display for StreamState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Thresholds driving stall and failure escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallPolicy {
	/// Consecutive identical position readings that count as a stall.
	pub stall_ticks: u32,
	/// Further unchanged readings while stalled before giving up.
	pub max_stalled_ticks: u32,
	/// Consecutive failed ticks before giving up.
	pub max_consecutive_failures: u32,
}

impl Default for StallPolicy {
	fn default() -> Self {
		Self {
			stall_ticks: 3,
			max_stalled_ticks: 60,
			max_consecutive_failures: 10,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
	pub from: StreamState,
	pub to: StreamState,
}

/// Pure state machine fed one reading per capture tick.
#[derive(Debug, Clone)]
pub struct StreamStateMachine {
	state: StreamState,
	policy: StallPolicy,
	last_position: Option<f64>,
	unchanged: u32,
	stalled_for: u32,
	failures: u32,
}

impl StreamStateMachine {
	pub fn new(policy: StallPolicy) -> Self {
		Self {
			state: StreamState::Starting,
			policy,
			last_position: None,
			unchanged: 0,
			stalled_for: 0,
			failures: 0,
		}
	}

	pub fn state(&self) -> StreamState {
		self.state
	}

	/// Identical readings seen in a row, the current one included.
	pub fn unchanged_readings(&self) -> u32 {
		self.unchanged
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.failures
	}

	/// Feeds one successful player reading.
	pub fn observe(&mut self, reading: &PlaybackState) -> Option<Transition> {
		if self.state.is_terminal() {
			return None;
		}
		self.failures = 0;

		let moved = self
			.last_position
			.is_none_or(|last| last != reading.current_time);
		self.last_position = Some(reading.current_time);
		if moved {
			self.unchanged = 1;
			self.stalled_for = 0;
		} else {
			self.unchanged += 1;
		}

		let reported = if reading.is_buffering {
			Some(StreamState::Buffering)
		} else if reading.is_playing {
			Some(StreamState::Playing)
		} else {
			None
		};

		match self.state {
			StreamState::Starting => match reported {
				Some(StreamState::Playing) => {
					// Stall counting starts with playback.
					self.unchanged = 1;
					self.transition(StreamState::Playing)
				}
				_ => None,
			},
			StreamState::Playing | StreamState::Buffering => {
				if self.unchanged >= self.policy.stall_ticks {
					self.transition(StreamState::Stalled)
				} else {
					reported.and_then(|next| self.transition(next))
				}
			}
			StreamState::Stalled => {
				if moved {
					self.transition(reported.unwrap_or(StreamState::Playing))
				} else {
					self.stalled_for += 1;
					if self.stalled_for >= self.policy.max_stalled_ticks {
						self.transition(StreamState::Error)
					} else {
						None
					}
				}
			}
			StreamState::Error | StreamState::Stopped => None,
		}
	}

	/// Records a failed tick. `fatal` failures (the page is gone) escalate at once.
	pub fn record_failure(&mut self, fatal: bool) -> Option<Transition> {
		if self.state.is_terminal() {
			return None;
		}
		self.failures += 1;
		if fatal || self.failures >= self.policy.max_consecutive_failures {
			self.transition(StreamState::Error)
		} else {
			None
		}
	}

	pub fn stop(&mut self) -> Option<Transition> {
		self.transition(StreamState::Stopped)
	}

	fn transition(&mut self, next: StreamState) -> Option<Transition> {
		if self.state == next || !self.state.can_transition_to(next) {
			return None;
		}
		let transition = Transition {
			from: self.state,
			to: next,
		};
		self.state = next;
		Some(transition)
	}
}

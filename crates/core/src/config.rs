//! Watcher configuration.
//!
//! Every section has defaults so a config file only needs to name what it
//! changes. Durations are carried as integer milliseconds (or seconds and
//! minutes where the field name says so) and exposed as [`Duration`]s.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use watcher_protocol::Source;

use crate::error::{Error, Result};
use crate::source_queue::RotationMode;

/// Shortest capture period a stream may run at.
pub const MIN_TICK: Duration = Duration::from_millis(1);
/// Longest capture period a stream may run at.
pub const MAX_TICK: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound for the rotation and status timers.
pub const MAX_TIMER_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
	pub agent: AgentConfig,
	pub uplink: UplinkConfig,
	pub streams: StreamConfig,
	pub browser: BrowserConfig,
	pub sources: Vec<Source>,
	pub insights: InsightConfig,
	pub health: HealthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
	/// Requested agent id; the Brain may assign a different one.
	pub agent_id: Option<String>,
	pub version: String,
}

impl Default for AgentConfig {
	fn default() -> Self {
		Self {
			agent_id: None,
			version: env!("CARGO_PKG_VERSION").to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
	pub url: String,
	pub api_key: String,
	pub batch_interval_ms: u64,
	pub batch_max_size: usize,
	pub reconnect_interval_ms: u64,
	pub max_reconnect_attempts: u32,
	pub auth_timeout_ms: u64,
	pub max_queue_size: usize,
	/// Attach base64 frame bytes to every observation.
	pub include_frames: bool,
}

impl Default for UplinkConfig {
	fn default() -> Self {
		Self {
			url: "ws://127.0.0.1:8080/agents".to_string(),
			api_key: String::new(),
			batch_interval_ms: 1000,
			batch_max_size: 10,
			reconnect_interval_ms: 5000,
			max_reconnect_attempts: 10,
			auth_timeout_ms: 5000,
			max_queue_size: 10_000,
			include_frames: false,
		}
	}
}

impl UplinkConfig {
	pub fn batch_interval(&self) -> Duration {
		Duration::from_millis(self.batch_interval_ms)
	}

	pub fn reconnect_interval(&self) -> Duration {
		Duration::from_millis(self.reconnect_interval_ms)
	}

	pub fn auth_timeout(&self) -> Duration {
		Duration::from_millis(self.auth_timeout_ms)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
	pub max_concurrent: usize,
	pub fps: f64,
	pub rotation_interval_minutes: u64,
	pub rotation_mode: RotationMode,
	/// Seed for [`RotationMode::Random`]; entropy when unset.
	pub rotation_seed: Option<u64>,
	pub status_interval_secs: u64,
	/// Identical position readings before a playing stream counts as stalled.
	pub stall_ticks: u32,
	/// Ticks spent stalled before the session gives up.
	pub max_stalled_ticks: u32,
	pub max_consecutive_failures: u32,
	pub stop_timeout_ms: u64,
	pub capture_timeout_ms: u64,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			max_concurrent: 3,
			fps: 1.0,
			rotation_interval_minutes: 30,
			rotation_mode: RotationMode::Priority,
			rotation_seed: None,
			status_interval_secs: 30,
			stall_ticks: 3,
			max_stalled_ticks: 60,
			max_consecutive_failures: 10,
			stop_timeout_ms: 5000,
			capture_timeout_ms: 10_000,
		}
	}
}

impl StreamConfig {
	/// Capture period for `fps`, clamped to [`MIN_TICK`]..=[`MAX_TICK`].
	///
	/// [`WatcherConfig::validate`] rejects rates outside that range; the clamp
	/// only keeps unvalidated configs from producing an unusable period.
	pub fn tick_interval(&self) -> Duration {
		Duration::try_from_secs_f64(1.0 / self.fps)
			.unwrap_or(MAX_TICK)
			.clamp(MIN_TICK, MAX_TICK)
	}

	pub fn rotation_interval(&self) -> Duration {
		self.rotation_interval_minutes
			.checked_mul(60)
			.map_or(MAX_TIMER_PERIOD, Duration::from_secs)
			.min(MAX_TIMER_PERIOD)
	}

	pub fn status_interval(&self) -> Duration {
		Duration::from_secs(self.status_interval_secs).min(MAX_TIMER_PERIOD)
	}

	fn validate_rates(&self) -> Result<()> {
		let tick = Duration::try_from_secs_f64(1.0 / self.fps).map_err(|_| {
			Error::Config(format!("streams.fps must be a positive number, got {}", self.fps))
		})?;
		if !(MIN_TICK..=MAX_TICK).contains(&tick) {
			return Err(Error::Config(format!(
				"streams.fps {} gives a capture period outside {}ms..{}s",
				self.fps,
				MIN_TICK.as_millis(),
				MAX_TICK.as_secs()
			)));
		}
		let max_minutes = MAX_TIMER_PERIOD.as_secs() / 60;
		if self.rotation_interval_minutes == 0 || self.rotation_interval_minutes > max_minutes {
			return Err(Error::Config(format!(
				"streams.rotation_interval_minutes must be between 1 and {max_minutes}"
			)));
		}
		if self.status_interval_secs == 0 || self.status_interval_secs > MAX_TIMER_PERIOD.as_secs() {
			return Err(Error::Config(format!(
				"streams.status_interval_secs must be between 1 and {}",
				MAX_TIMER_PERIOD.as_secs()
			)));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
	#[default]
	Jpeg,
	Png,
}

impl FrameFormat {
	pub fn as_str(self) -> &'static str {
		match self {
			FrameFormat::Jpeg => "jpeg",
			FrameFormat::Png => "png",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
	/// DevTools HTTP endpoint of an already running browser, or the one
	/// exposed by the browser we launch.
	pub cdp_endpoint: String,
	/// Launch this executable instead of attaching to `cdp_endpoint`.
	pub executable: Option<PathBuf>,
	pub headless: bool,
	pub viewport_width: u32,
	pub viewport_height: u32,
	pub navigation_timeout_ms: u64,
	pub frame_format: FrameFormat,
	/// JPEG quality, ignored for PNG.
	pub frame_quality: u8,
	pub dismiss_popups: bool,
}

impl Default for BrowserConfig {
	fn default() -> Self {
		Self {
			cdp_endpoint: "http://127.0.0.1:9222".to_string(),
			executable: None,
			headless: true,
			viewport_width: 1280,
			viewport_height: 720,
			navigation_timeout_ms: 30_000,
			frame_format: FrameFormat::Jpeg,
			frame_quality: 70,
			dismiss_popups: true,
		}
	}
}

impl BrowserConfig {
	pub fn navigation_timeout(&self) -> Duration {
		Duration::from_millis(self.navigation_timeout_ms)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
	/// JSONL file backing the [`InsightStore`](crate::InsightStore).
	pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
	/// Serve `/health` and `/stats` on this port when set.
	pub port: Option<u16>,
}

impl WatcherConfig {
	/// Rejects configurations the orchestrator cannot run with.
	pub fn validate(&self) -> Result<()> {
		if self.uplink.url.trim().is_empty() {
			return Err(Error::Config("uplink.url must be set".into()));
		}
		let scheme = url::Url::parse(&self.uplink.url)
			.map_err(|e| Error::Config(format!("uplink.url {:?}: {e}", self.uplink.url)))?;
		if !matches!(scheme.scheme(), "ws" | "wss") {
			return Err(Error::Config(format!(
				"uplink.url must use ws:// or wss://, got {}",
				scheme.scheme()
			)));
		}
		if self.uplink.api_key.is_empty() {
			return Err(Error::Config(
				"uplink.api_key must be set (or WATCHER_API_KEY)".into(),
			));
		}
		if self.uplink.batch_max_size == 0 {
			return Err(Error::Config("uplink.batch_max_size must be at least 1".into()));
		}
		if self.uplink.max_queue_size < self.uplink.batch_max_size {
			return Err(Error::Config(
				"uplink.max_queue_size must be at least uplink.batch_max_size".into(),
			));
		}
		if self.uplink.batch_interval_ms == 0 {
			return Err(Error::Config("uplink.batch_interval_ms must be positive".into()));
		}
		if self.streams.max_concurrent == 0 {
			return Err(Error::Config("streams.max_concurrent must be at least 1".into()));
		}
		self.streams.validate_rates()?;
		if self.streams.stall_ticks == 0 {
			return Err(Error::Config("streams.stall_ticks must be at least 1".into()));
		}
		if self.sources.is_empty() {
			return Err(Error::Config("at least one source must be configured".into()));
		}
		for source in &self.sources {
			url::Url::parse(&source.url).map_err(|e| {
				Error::Config(format!("source {:?} has invalid url {:?}: {e}", source.name, source.url))
			})?;
		}
		if self.browser.frame_quality > 100 {
			return Err(Error::Config("browser.frame_quality must be 0-100".into()));
		}
		Ok(())
	}
}

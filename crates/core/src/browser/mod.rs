//! Browser collaborator contract.
//!
//! A [`StreamSession`](crate::StreamSession) never talks to a browser
//! directly; it drives a [`BrowserSession`] obtained from a
//! [`BrowserLauncher`]. [`cdp`] provides the Chrome DevTools implementation.
//! Tests substitute scripted fakes.

pub mod cdp;
pub mod frame;
mod scripts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use watcher_protocol::{Detection, Source};

use crate::error::Result;

pub use frame::frame_dimensions;

/// Player state as reported by the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackState {
	pub is_playing: bool,
	pub is_buffering: bool,
	pub current_time: f64,
	pub duration: Option<f64>,
	pub video_id: Option<String>,
	pub title: Option<String>,
	pub video_width: Option<u32>,
	pub video_height: Option<u32>,
}

/// One browser page bound to one source.
#[async_trait]
pub trait BrowserSession: Send {
	/// Loads the source and waits until a playable video is present.
	async fn navigate_to_source(&mut self, source: &Source) -> Result<()>;

	async fn playback_state(&mut self) -> Result<PlaybackState>;

	/// Screenshot of the current frame. `Ok(None)` when nothing was rendered.
	async fn capture_frame(&mut self) -> Result<Option<Vec<u8>>>;

	async fn pause(&mut self) -> Result<()>;

	async fn resume(&mut self) -> Result<()>;

	/// Releases the page. Safe to call more than once.
	async fn close(&mut self) -> Result<()>;
}

/// Opens fresh [`BrowserSession`]s.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
	async fn launch(&self) -> Result<Box<dyn BrowserSession>>;

	/// Tears down anything the launcher itself owns, such as a browser process.
	async fn shutdown(&self) {}
}

/// Turns a captured frame into detections.
pub trait FrameAnalyzer: Send + Sync {
	fn analyze(&self, frame: &[u8]) -> Vec<Detection>;
}

/// Analyzer used when no detection model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDetections;

impl FrameAnalyzer for NoDetections {
	fn analyze(&self, _frame: &[u8]) -> Vec<Detection> {
		Vec::new()
	}
}

//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use watcher::protocol::{Observation, Source, StreamInfo};
use watcher::{
	BrowserLauncher, BrowserSession, Error, ObservationSink, PlaybackState, Result, UplinkChannel,
	UplinkOptions, WatcherConfig,
};
use watcher_runtime::{FakeConnector, Responder};

/// Minimal PNG header for a 1280x720 frame.
pub fn png_frame() -> Vec<u8> {
	let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
	bytes.extend_from_slice(&13u32.to_be_bytes());
	bytes.extend_from_slice(b"IHDR");
	bytes.extend_from_slice(&1280u32.to_be_bytes());
	bytes.extend_from_slice(&720u32.to_be_bytes());
	bytes.extend_from_slice(&[8, 2, 0, 0, 0]);
	bytes
}

/// Knobs and counters for one fake page.
#[derive(Default)]
pub struct BrowserProbe {
	pub url: Mutex<Option<String>>,
	pub position: Mutex<f64>,
	/// Advance the playback position on every player query.
	pub advancing: AtomicBool,
	pub captures: AtomicUsize,
	pub empty_frames: AtomicBool,
	pub fail_capture: AtomicBool,
	pub target_closed: AtomicBool,
	pub paused: AtomicBool,
	pub closed: AtomicBool,
	pub close_calls: AtomicUsize,
}

pub struct FakeBrowser {
	probe: Arc<BrowserProbe>,
	navigate_delay: Duration,
	fail: bool,
}

#[async_trait]
impl BrowserSession for FakeBrowser {
	async fn navigate_to_source(&mut self, source: &Source) -> Result<()> {
		if !self.navigate_delay.is_zero() {
			tokio::time::sleep(self.navigate_delay).await;
		}
		if self.fail {
			return Err(Error::Navigation {
				url: source.url.clone(),
				reason: "no playable video".into(),
			});
		}
		*self.probe.url.lock() = Some(source.url.clone());
		Ok(())
	}

	async fn playback_state(&mut self) -> Result<PlaybackState> {
		let mut position = self.probe.position.lock();
		if self.probe.advancing.load(Ordering::SeqCst) {
			*position += 1.0;
		}
		Ok(PlaybackState {
			is_playing: !self.probe.paused.load(Ordering::SeqCst),
			current_time: *position,
			video_id: Some("vid-1".into()),
			title: Some("Harbor cam".into()),
			..Default::default()
		})
	}

	async fn capture_frame(&mut self) -> Result<Option<Vec<u8>>> {
		if self.probe.target_closed.load(Ordering::SeqCst) {
			return Err(watcher_runtime::Error::TargetClosed("page crashed".into()).into());
		}
		if self.probe.fail_capture.load(Ordering::SeqCst) {
			return Err(Error::Capture("blank screenshot".into()));
		}
		self.probe.captures.fetch_add(1, Ordering::SeqCst);
		if self.probe.empty_frames.load(Ordering::SeqCst) {
			return Ok(None);
		}
		Ok(Some(png_frame()))
	}

	async fn pause(&mut self) -> Result<()> {
		self.probe.paused.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn resume(&mut self) -> Result<()> {
		self.probe.paused.store(false, Ordering::SeqCst);
		Ok(())
	}

	async fn close(&mut self) -> Result<()> {
		self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
		self.probe.closed.store(true, Ordering::SeqCst);
		Ok(())
	}
}

/// Hands out [`FakeBrowser`]s and keeps their probes.
#[derive(Default)]
pub struct FakeLauncher {
	pub probes: Mutex<Vec<Arc<BrowserProbe>>>,
	pub failing_urls: Mutex<HashSet<String>>,
	pub navigate_delay: Mutex<Duration>,
	/// Extra navigation time for particular URLs.
	pub url_delays: Mutex<HashMap<String, Duration>>,
	pub launches: AtomicUsize,
	pub shut_down: AtomicBool,
}

impl FakeLauncher {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn fail_url(&self, url: &str) {
		self.failing_urls.lock().insert(url.to_string());
	}

	pub fn delay_url(&self, url: &str, delay: Duration) {
		self.url_delays.lock().insert(url.to_string(), delay);
	}

	pub fn probe(&self, index: usize) -> Arc<BrowserProbe> {
		Arc::clone(&self.probes.lock()[index])
	}

	pub fn probe_for(&self, url: &str) -> Option<Arc<BrowserProbe>> {
		self.probes
			.lock()
			.iter()
			.find(|p| p.url.lock().as_deref() == Some(url))
			.cloned()
	}
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
	async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
		self.launches.fetch_add(1, Ordering::SeqCst);
		let probe = Arc::new(BrowserProbe::default());
		probe.advancing.store(true, Ordering::SeqCst);
		self.probes.lock().push(Arc::clone(&probe));
		Ok(Box::new(LazyFailBrowser {
			inner: FakeBrowser {
				probe,
				navigate_delay: *self.navigate_delay.lock(),
				fail: false,
			},
			failing: self.failing_urls.lock().clone(),
			delays: self.url_delays.lock().clone(),
		}))
	}

	async fn shutdown(&self) {
		self.shut_down.store(true, Ordering::SeqCst);
	}
}

/// Fails or slows navigation for URLs marked so at launch time.
struct LazyFailBrowser {
	inner: FakeBrowser,
	failing: HashSet<String>,
	delays: HashMap<String, Duration>,
}

#[async_trait]
impl BrowserSession for LazyFailBrowser {
	async fn navigate_to_source(&mut self, source: &Source) -> Result<()> {
		if let Some(delay) = self.delays.get(&source.url) {
			tokio::time::sleep(*delay).await;
		}
		self.inner.fail = self.failing.contains(&source.url);
		self.inner.navigate_to_source(source).await
	}

	async fn playback_state(&mut self) -> Result<PlaybackState> {
		self.inner.playback_state().await
	}

	async fn capture_frame(&mut self) -> Result<Option<Vec<u8>>> {
		self.inner.capture_frame().await
	}

	async fn pause(&mut self) -> Result<()> {
		self.inner.pause().await
	}

	async fn resume(&mut self) -> Result<()> {
		self.inner.resume().await
	}

	async fn close(&mut self) -> Result<()> {
		self.inner.close().await
	}
}

/// [`ObservationSink`] that records everything it is given.
#[derive(Default)]
pub struct RecordingSink {
	pub observations: Mutex<Vec<Observation>>,
	pub streams: Mutex<Vec<StreamInfo>>,
	pub removed: Mutex<Vec<String>>,
}

impl RecordingSink {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn frame_ids(&self) -> Vec<u64> {
		self.observations.lock().iter().map(|o| o.frame_id).collect()
	}

	pub fn count(&self) -> usize {
		self.observations.lock().len()
	}
}

impl ObservationSink for RecordingSink {
	fn submit(&self, observation: Observation) {
		self.observations.lock().push(observation);
	}

	fn update_stream(&self, info: StreamInfo) {
		self.streams.lock().push(info);
	}

	fn remove_stream(&self, stream_id: &str) {
		self.removed.lock().push(stream_id.to_string());
	}
}

/// Brain that accepts any key and acknowledges every batch.
pub fn brain_responder() -> Responder {
	Arc::new(|msg: &Value| match msg["type"].as_str()? {
		"auth" => Some(json!({ "type": "auth_success", "agentId": "agent-42" })),
		"observations" => Some(json!({
			"type": "observations_ack",
			"batchId": msg["batchId"],
			"received": msg["observations"].as_array().map(Vec::len).unwrap_or(0),
		})),
		_ => None,
	})
}

/// Brain that rejects the handshake.
pub fn rejecting_responder() -> Responder {
	Arc::new(|msg: &Value| {
		(msg["type"] == "auth").then(|| {
			json!({ "type": "auth_error", "error": "invalid api key", "code": "INVALID_KEY" })
		})
	})
}

pub fn uplink_options() -> UplinkOptions {
	UplinkOptions {
		api_key: "test-key".into(),
		version: "0.0.0-test".into(),
		batch_interval: Duration::from_millis(1000),
		batch_max_size: 3,
		max_queue_size: 100,
		..UplinkOptions::default()
	}
}

pub fn uplink(options: UplinkOptions) -> (UplinkChannel, FakeConnector) {
	let connector = FakeConnector::new().with_responder(brain_responder());
	let channel = UplinkChannel::new(Arc::new(connector.clone()), options);
	(channel, connector)
}

pub fn observation(stream_id: &str, frame_id: u64) -> Observation {
	Observation {
		stream_id: stream_id.into(),
		frame_id,
		captured_at: Utc::now(),
		frame_width: 1280,
		frame_height: 720,
		detections: vec![],
		video_id: None,
		video_title: None,
		current_time: None,
		duration: None,
		category: None,
		frame: None,
	}
}

pub fn sources(n: usize) -> Vec<Source> {
	(0..n)
		.map(|i| Source::new(format!("source-{i}"), format!("https://example.com/watch?v={i}")))
		.collect()
}

pub fn config(sources: Vec<Source>, max_concurrent: usize) -> WatcherConfig {
	let mut config = WatcherConfig::default();
	config.uplink.api_key = "test-key".into();
	config.uplink.batch_max_size = 3;
	config.streams.max_concurrent = max_concurrent;
	config.streams.rotation_mode = watcher::RotationMode::Sequential;
	config.sources = sources;
	config
}

/// Frame ids of every observation sent over `controller`, batch by batch.
pub fn sent_batches(controller: &watcher_runtime::FakeTransportController) -> Vec<Vec<u64>> {
	controller
		.sent_of_type("observations")
		.iter()
		.map(|batch| {
			batch["observations"]
				.as_array()
				.map(|obs| obs.iter().filter_map(|o| o["frameId"].as_u64()).collect())
				.unwrap_or_default()
		})
		.collect()
}

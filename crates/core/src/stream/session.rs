use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;
use watcher_protocol::{Observation, Source, SourceType, StreamInfo};

use super::ObservationSink;
use super::state::{StallPolicy, StreamState, StreamStateMachine, Transition};
use crate::browser::{BrowserLauncher, BrowserSession, FrameAnalyzer, PlaybackState, frame_dimensions};
use crate::config::WatcherConfig;
use crate::error::{Error, Result};

type SharedBrowser = Arc<AsyncMutex<Box<dyn BrowserSession>>>;

/// Tunables for a single [`StreamSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
	pub tick_interval: Duration,
	pub stall: StallPolicy,
	/// How long `stop` waits for an in-flight tick before aborting it.
	pub stop_timeout: Duration,
	/// Upper bound on one capture plus player query.
	pub capture_timeout: Duration,
	pub include_frames: bool,
	/// Reported frame size when the image header cannot be read.
	pub fallback_dimensions: (u32, u32),
}

impl SessionOptions {
	pub fn from_config(config: &WatcherConfig) -> Self {
		let streams = &config.streams;
		Self {
			tick_interval: streams.tick_interval(),
			stall: StallPolicy {
				stall_ticks: streams.stall_ticks,
				max_stalled_ticks: streams.max_stalled_ticks,
				max_consecutive_failures: streams.max_consecutive_failures,
			},
			stop_timeout: Duration::from_millis(streams.stop_timeout_ms),
			capture_timeout: Duration::from_millis(streams.capture_timeout_ms),
			include_frames: config.uplink.include_frames,
			fallback_dimensions: (config.browser.viewport_width, config.browser.viewport_height),
		}
	}
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self::from_config(&WatcherConfig::default())
	}
}

/// Point-in-time copy of a session's counters and player state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
	pub id: String,
	pub source_name: String,
	pub url: String,
	#[serde(rename = "type")]
	pub kind: SourceType,
	pub category: String,
	pub state: StreamState,
	pub paused: bool,
	pub frames_captured: u64,
	pub current_time: Option<f64>,
	pub duration: Option<f64>,
	pub video_id: Option<String>,
	pub title: Option<String>,
	pub started_at: DateTime<Utc>,
	pub last_activity: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
	fn new(id: String, source: &Source) -> Self {
		Self {
			id,
			source_name: source.name.clone(),
			url: source.url.clone(),
			kind: source.kind,
			category: source.category.clone(),
			state: StreamState::Starting,
			paused: false,
			frames_captured: 0,
			current_time: None,
			duration: None,
			video_id: None,
			title: None,
			started_at: Utc::now(),
			last_activity: None,
		}
	}

	pub fn stream_info(&self) -> StreamInfo {
		StreamInfo {
			stream_id: self.id.clone(),
			kind: self.kind,
			url: self.url.clone(),
			category: self.category.clone(),
			video_id: self.video_id.clone(),
			title: self.title.clone(),
		}
	}
}

struct Shared {
	running: AtomicBool,
	paused: AtomicBool,
	machine: Mutex<StreamStateMachine>,
	snapshot: Mutex<SessionSnapshot>,
}

impl Shared {
	fn is_live(&self) -> bool {
		self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
	}

	fn state(&self) -> StreamState {
		self.machine.lock().state()
	}

	/// Feeds a reading and mirrors the outcome into the snapshot.
	/// Returns the transition and whether the video identity changed.
	fn record_reading(&self, playback: &PlaybackState) -> (Option<Transition>, bool) {
		let mut machine = self.machine.lock();
		let transition = machine.observe(playback);
		let mut snapshot = self.snapshot.lock();
		snapshot.state = machine.state();
		snapshot.current_time = Some(playback.current_time);
		snapshot.duration = playback.duration;
		let identity_changed = (playback.video_id.is_some() && snapshot.video_id != playback.video_id)
			|| (playback.title.is_some() && snapshot.title != playback.title);
		if playback.video_id.is_some() {
			snapshot.video_id.clone_from(&playback.video_id);
		}
		if playback.title.is_some() {
			snapshot.title.clone_from(&playback.title);
		}
		(transition, identity_changed)
	}

	fn record_failure(&self, fatal: bool) -> Option<Transition> {
		let mut machine = self.machine.lock();
		let transition = machine.record_failure(fatal);
		self.snapshot.lock().state = machine.state();
		transition
	}

	fn finish(&self) -> Option<Transition> {
		let mut machine = self.machine.lock();
		let transition = machine.stop();
		self.snapshot.lock().state = machine.state();
		transition
	}

	fn next_frame_id(&self) -> u64 {
		let mut snapshot = self.snapshot.lock();
		snapshot.frames_captured += 1;
		snapshot.last_activity = Some(Utc::now());
		snapshot.frames_captured
	}
}

/// Capture loop bound to one source for its whole life.
///
/// Created already navigated; the loop ticks at the configured rate until
/// [`stop`](Self::stop) or the state machine reaches `error`.
pub struct StreamSession {
	id: String,
	source: Source,
	started: Instant,
	shared: Arc<Shared>,
	browser: SharedBrowser,
	sink: Arc<dyn ObservationSink>,
	options: SessionOptions,
	stop_tx: watch::Sender<bool>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
	/// Opens a browser page, navigates it to `source` and starts capturing.
	///
	/// # Errors
	///
	/// Fails if the page cannot be opened or navigation does not reach a
	/// playable video. The page is closed before returning the error.
	pub async fn start(
		source: Source,
		launcher: &dyn BrowserLauncher,
		sink: Arc<dyn ObservationSink>,
		analyzer: Arc<dyn FrameAnalyzer>,
		options: SessionOptions,
	) -> Result<Self> {
		let id = new_stream_id();
		let mut browser = launcher.launch().await?;
		if let Err(e) = browser.navigate_to_source(&source).await {
			if let Err(close_err) = browser.close().await {
				tracing::debug!(target: "watcher.stream", error = %close_err, "closing failed page");
			}
			return Err(e);
		}

		let snapshot = SessionSnapshot::new(id.clone(), &source);
		sink.update_stream(snapshot.stream_info());

		let shared = Arc::new(Shared {
			running: AtomicBool::new(true),
			paused: AtomicBool::new(false),
			machine: Mutex::new(StreamStateMachine::new(options.stall)),
			snapshot: Mutex::new(snapshot),
		});
		let browser: SharedBrowser = Arc::new(AsyncMutex::new(browser));
		let (stop_tx, stop_rx) = watch::channel(false);

		let capture = CaptureLoop {
			id: id.clone(),
			category: (!source.category.is_empty()).then(|| source.category.clone()),
			shared: Arc::clone(&shared),
			browser: Arc::clone(&browser),
			sink: Arc::clone(&sink),
			analyzer,
			options: options.clone(),
			stop_rx,
		};
		let task = tokio::spawn(capture.run());

		tracing::info!(
			target: "watcher.stream",
			stream_id = %id,
			source = %source.name,
			url = %source.url,
			"stream session started"
		);

		Ok(Self {
			id,
			source,
			started: Instant::now(),
			shared,
			browser,
			sink,
			options,
			stop_tx,
			task: Mutex::new(Some(task)),
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn source(&self) -> &Source {
		&self.source
	}

	/// Monotonic start time, used to pick the oldest session for rotation.
	pub fn started(&self) -> Instant {
		self.started
	}

	pub fn state(&self) -> StreamState {
		self.shared.state()
	}

	pub fn is_running(&self) -> bool {
		self.shared.running.load(Ordering::SeqCst)
	}

	pub fn is_paused(&self) -> bool {
		self.shared.paused.load(Ordering::SeqCst)
	}

	pub fn frames_captured(&self) -> u64 {
		self.shared.snapshot.lock().frames_captured
	}

	pub fn snapshot(&self) -> SessionSnapshot {
		self.shared.snapshot.lock().clone()
	}

	/// Holds capture output until [`resume`](Self::resume). The loop keeps ticking.
	pub async fn pause(&self) -> Result<()> {
		if !self.is_running() || self.shared.paused.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		self.shared.snapshot.lock().paused = true;
		tracing::info!(target: "watcher.stream", stream_id = %self.id, "stream paused");
		self.browser.lock().await.pause().await
	}

	pub async fn resume(&self) -> Result<()> {
		if !self.is_running() || !self.shared.paused.swap(false, Ordering::SeqCst) {
			return Ok(());
		}
		self.shared.snapshot.lock().paused = false;
		tracing::info!(target: "watcher.stream", stream_id = %self.id, "stream resumed");
		self.browser.lock().await.resume().await
	}

	/// Stops the loop and closes the page. Later calls are no-ops.
	///
	/// An in-flight tick gets `stop_timeout` to finish before it is aborted.
	/// Counters stay readable through [`snapshot`](Self::snapshot) afterwards.
	pub async fn stop(&self) -> Result<()> {
		if !self.shared.running.swap(false, Ordering::SeqCst) {
			return Ok(());
		}
		let _ = self.stop_tx.send(true);

		let task = self.task.lock().take();
		if let Some(task) = task {
			let abort = task.abort_handle();
			if tokio::time::timeout(self.options.stop_timeout, task).await.is_err() {
				tracing::warn!(
					target: "watcher.stream",
					stream_id = %self.id,
					timeout_ms = self.options.stop_timeout.as_millis() as u64,
					"capture tick did not finish in time, aborting"
				);
				abort.abort();
			}
		}

		self.shared.finish();
		self.sink.remove_stream(&self.id);

		let mut browser = self.browser.lock().await;
		let result = match tokio::time::timeout(self.options.stop_timeout, browser.close()).await {
			Ok(result) => result,
			Err(_) => Err(Error::Timeout {
				ms: self.options.stop_timeout.as_millis() as u64,
				condition: "browser page to close".into(),
			}),
		};

		let snapshot = self.snapshot();
		tracing::info!(
			target: "watcher.stream",
			stream_id = %self.id,
			state = %snapshot.state,
			frames = snapshot.frames_captured,
			"stream session stopped"
		);
		result
	}
}

impl Drop for StreamSession {
	fn drop(&mut self) {
		if let Some(task) = self.task.lock().take() {
			task.abort();
		}
	}
}

struct CaptureLoop {
	id: String,
	category: Option<String>,
	shared: Arc<Shared>,
	browser: SharedBrowser,
	sink: Arc<dyn ObservationSink>,
	analyzer: Arc<dyn FrameAnalyzer>,
	options: SessionOptions,
	stop_rx: watch::Receiver<bool>,
}

impl CaptureLoop {
	async fn run(mut self) {
		let mut ticker = tokio::time::interval(self.options.tick_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = self.stop_rx.changed() => break,
				_ = ticker.tick() => {}
			}
			if !self.shared.running.load(Ordering::SeqCst) {
				break;
			}
			if self.shared.paused.load(Ordering::SeqCst) {
				continue;
			}
			self.tick().await;
			if self.shared.state().is_terminal() {
				break;
			}
		}
		tracing::debug!(target: "watcher.stream", stream_id = %self.id, "capture loop exited");
	}

	async fn tick(&self) {
		let outcome = {
			let mut browser = self.browser.lock().await;
			tokio::time::timeout(self.options.capture_timeout, async {
				let frame = browser.capture_frame().await?;
				let playback = browser.playback_state().await?;
				Ok::<_, Error>((frame, playback))
			})
			.await
		};

		match outcome {
			Ok(Ok((frame, playback))) => self.on_capture(frame, playback),
			Ok(Err(e)) => self.on_failure(e),
			Err(_) => self.on_failure(Error::Timeout {
				ms: self.options.capture_timeout.as_millis() as u64,
				condition: "frame capture".into(),
			}),
		}
	}

	fn on_capture(&self, frame: Option<Vec<u8>>, playback: PlaybackState) {
		// stop or pause may have landed while the tick was in flight
		if !self.shared.is_live() {
			return;
		}

		let (transition, identity_changed) = self.shared.record_reading(&playback);
		if let Some(t) = transition {
			self.log_transition(t);
		}
		if identity_changed {
			self.sink.update_stream(self.shared.snapshot.lock().stream_info());
		}
		if self.shared.state().is_terminal() {
			return;
		}

		let Some(frame) = frame else {
			tracing::debug!(target: "watcher.stream", stream_id = %self.id, "no frame this tick");
			return;
		};

		let frame_id = self.shared.next_frame_id();
		let (frame_width, frame_height) =
			frame_dimensions(&frame).unwrap_or(self.options.fallback_dimensions);
		let observation = Observation {
			stream_id: self.id.clone(),
			frame_id,
			captured_at: Utc::now(),
			frame_width,
			frame_height,
			detections: self.analyzer.analyze(&frame),
			video_id: playback.video_id,
			video_title: playback.title,
			current_time: Some(playback.current_time),
			duration: playback.duration,
			category: self.category.clone(),
			frame: self.options.include_frames.then(|| BASE64.encode(&frame)),
		};
		self.sink.submit(observation);
	}

	fn on_failure(&self, error: Error) {
		let fatal = error.is_target_closed();
		tracing::debug!(
			target: "watcher.stream",
			stream_id = %self.id,
			error = %error,
			fatal,
			"capture tick failed"
		);
		if let Some(t) = self.shared.record_failure(fatal) {
			tracing::warn!(
				target: "watcher.stream",
				stream_id = %self.id,
				error = %error,
				"stream session failed"
			);
			self.log_transition(t);
		}
	}

	fn log_transition(&self, t: Transition) {
		match t.to {
			StreamState::Stalled | StreamState::Error => tracing::warn!(
				target: "watcher.stream",
				stream_id = %self.id,
				from = %t.from,
				to = %t.to,
				"stream state changed"
			),
			_ => tracing::info!(
				target: "watcher.stream",
				stream_id = %self.id,
				from = %t.from,
				to = %t.to,
				"stream state changed"
			),
		}
	}
}

fn new_stream_id() -> String {
	let uuid = Uuid::new_v4().simple().to_string();
	format!("stream-{}", &uuid[..12])
}

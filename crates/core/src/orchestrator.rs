//! Top-level coordinator.
//!
//! Owns the uplink, the source queue and the set of active
//! [`StreamSession`]s. Two timers run while started: rotation every
//! `rotation_interval_minutes` and a status push every
//! `status_interval_secs`. Both hold only a weak reference and exit on the
//! shutdown signal; neither is aborted mid-tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use watcher_protocol::{AgentState, Source, StatusReport};

use crate::browser::{BrowserLauncher, FrameAnalyzer, NoDetections};
use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventStream, OrchestratorEvent};
use crate::source_queue::{RotationMode, SourceQueue};
use crate::stream::{ObservationSink, SessionOptions, SessionSnapshot, StreamSession};
use crate::uplink::{UplinkChannel, UplinkStats};

/// Running totals folded in from sessions that are no longer active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
	pub sessions_started: u64,
	pub sessions_failed: u64,
	pub sessions_completed: u64,
	/// Frames captured by completed sessions only.
	pub frames_captured: u64,
	pub rotations: u64,
}

/// Point-in-time view returned by [`Orchestrator::stats`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
	pub running: bool,
	pub uptime_secs: u64,
	pub max_concurrent: usize,
	pub active_streams: usize,
	pub rotation_mode: RotationMode,
	pub source_count: usize,
	/// Queue index the next session will be bound to.
	pub next_source_index: usize,
	/// Completed plus live sessions.
	pub total_frames_captured: u64,
	pub totals: Totals,
	pub streams: Vec<SessionSnapshot>,
	pub uplink: UplinkStats,
}

/// Result of one [`Orchestrator::rotate`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
	/// Another rotation held the lock.
	Skipped,
	/// No active sessions.
	Idle,
	Rotated {
		retired: Vec<String>,
		started: Vec<String>,
	},
}

pub struct Orchestrator {
	config: Arc<WatcherConfig>,
	uplink: UplinkChannel,
	launcher: Arc<dyn BrowserLauncher>,
	analyzer: Arc<dyn FrameAnalyzer>,
	session_options: SessionOptions,
	queue: Mutex<SourceQueue>,
	sessions: Mutex<Vec<Arc<StreamSession>>>,
	totals: Mutex<Totals>,
	rotation_lock: AsyncMutex<()>,
	shutdown_tx: watch::Sender<bool>,
	timers: Mutex<Vec<JoinHandle<()>>>,
	running: AtomicBool,
	stopping: AtomicBool,
	started_at: Mutex<Option<Instant>>,
	events: EventBus<OrchestratorEvent>,
}

impl Orchestrator {
	pub fn new(
		config: Arc<WatcherConfig>,
		uplink: UplinkChannel,
		launcher: Arc<dyn BrowserLauncher>,
	) -> Self {
		let queue = SourceQueue::new(
			config.sources.clone(),
			config.streams.rotation_mode,
			config.streams.rotation_seed,
		);
		let (shutdown_tx, _) = watch::channel(false);
		Self {
			session_options: SessionOptions::from_config(&config),
			config,
			uplink,
			launcher,
			analyzer: Arc::new(NoDetections),
			queue: Mutex::new(queue),
			sessions: Mutex::new(Vec::new()),
			totals: Mutex::new(Totals::default()),
			rotation_lock: AsyncMutex::new(()),
			shutdown_tx,
			timers: Mutex::new(Vec::new()),
			running: AtomicBool::new(false),
			stopping: AtomicBool::new(false),
			started_at: Mutex::new(None),
			events: EventBus::default(),
		}
	}

	pub fn with_analyzer(mut self, analyzer: Arc<dyn FrameAnalyzer>) -> Self {
		self.analyzer = analyzer;
		self
	}

	/// Connects the uplink, fills every stream slot and starts the timers.
	///
	/// # Errors
	///
	/// Invalid configuration or a failed uplink handshake abort startup
	/// before any session exists. Sessions that fail to start are logged
	/// and skipped.
	pub async fn start(self: &Arc<Self>) -> Result<()> {
		self.config.validate()?;
		if self.running.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		match self.uplink.connect().await {
			Ok(agent_id) => {
				tracing::info!(target: "watcher.orchestrator", %agent_id, "uplink ready");
			}
			Err(e) => {
				self.running.store(false, Ordering::SeqCst);
				tracing::error!(target: "watcher.orchestrator", error = %e, "uplink handshake failed, not starting");
				return Err(e);
			}
		}

		*self.started_at.lock() = Some(Instant::now());
		let started = self.fill_slots().await;
		tracing::info!(
			target: "watcher.orchestrator",
			active = started.len(),
			max_concurrent = self.config.streams.max_concurrent,
			mode = %self.config.streams.rotation_mode,
			"orchestrator started"
		);

		self.spawn_timers();
		Ok(())
	}

	/// Replaces the oldest session with the next source.
	///
	/// Sessions already in `error` are reaped first. Not reentrant: a call
	/// made while another rotation runs returns [`RotationOutcome::Skipped`].
	pub async fn rotate(&self) -> RotationOutcome {
		let Ok(_rotating) = self.rotation_lock.try_lock() else {
			tracing::debug!(target: "watcher.orchestrator", "rotation already in progress");
			return RotationOutcome::Skipped;
		};
		if self.sessions.lock().is_empty() {
			tracing::debug!(target: "watcher.orchestrator", "no active sessions to rotate");
			return RotationOutcome::Idle;
		}

		let failed: Vec<Arc<StreamSession>> = {
			let mut sessions = self.sessions.lock();
			let (failed, live): (Vec<_>, Vec<_>) =
				sessions.drain(..).partition(|s| s.state().is_terminal());
			*sessions = live;
			failed
		};
		let mut retired = Vec::new();
		for session in failed {
			tracing::info!(target: "watcher.orchestrator", stream_id = %session.id(), "reaping failed session");
			self.retire(&session).await;
			retired.push(session.id().to_string());
		}

		let oldest = {
			let mut sessions = self.sessions.lock();
			let index = sessions
				.iter()
				.enumerate()
				.min_by_key(|(_, s)| s.started())
				.map(|(i, _)| i);
			index.map(|i| sessions.remove(i))
		};
		if let Some(session) = oldest {
			self.retire(&session).await;
			retired.push(session.id().to_string());
		}

		let started = self.fill_slots().await;
		self.totals.lock().rotations += 1;
		let active = self.sessions.lock().len();
		tracing::info!(
			target: "watcher.orchestrator",
			retired = ?retired,
			started = ?started,
			active,
			"rotation complete"
		);
		if active < self.config.streams.max_concurrent {
			tracing::warn!(
				target: "watcher.orchestrator",
				active,
				max_concurrent = self.config.streams.max_concurrent,
				"running below capacity until next rotation"
			);
		}
		self.events.emit(OrchestratorEvent::Rotated {
			retired: retired.clone(),
			started: started.clone(),
		});
		RotationOutcome::Rotated { retired, started }
	}

	/// Stops timers, then every session concurrently, then the uplink.
	/// Never fails; individual errors are logged. Idempotent.
	pub async fn stop(&self) {
		if !self.running.swap(false, Ordering::SeqCst) {
			return;
		}
		self.stopping.store(true, Ordering::SeqCst);
		tracing::info!(target: "watcher.orchestrator", "stopping orchestrator");

		self.shutdown_tx.send_replace(true);
		let timers: Vec<JoinHandle<()>> = self.timers.lock().drain(..).collect();
		for timer in timers {
			if let Err(e) = timer.await {
				tracing::debug!(target: "watcher.orchestrator", error = %e, "timer task ended abnormally");
			}
		}

		self.uplink.send_status(self.status_report()).await;

		let sessions: Vec<Arc<StreamSession>> = self.sessions.lock().drain(..).collect();
		let results = join_all(sessions.iter().map(|s| s.stop())).await;
		for (session, result) in sessions.iter().zip(results) {
			if let Err(e) = result {
				tracing::warn!(
					target: "watcher.orchestrator",
					stream_id = %session.id(),
					error = %e,
					"session did not stop cleanly"
				);
			}
			self.fold(session);
		}

		self.uplink.disconnect().await;
		self.launcher.shutdown().await;
		self.stopping.store(false, Ordering::SeqCst);

		let totals = self.totals.lock().clone();
		tracing::info!(
			target: "watcher.orchestrator",
			sessions = totals.sessions_completed,
			frames = totals.frames_captured,
			rotations = totals.rotations,
			"orchestrator stopped"
		);
	}

	pub async fn pause_stream(&self, stream_id: &str) -> Result<()> {
		self.find(stream_id)?.pause().await
	}

	pub async fn resume_stream(&self, stream_id: &str) -> Result<()> {
		self.find(stream_id)?.resume().await
	}

	/// Snapshot of live sessions and totals. Only takes short locks.
	pub fn stats(&self) -> OrchestratorStats {
		let streams: Vec<SessionSnapshot> = self.sessions.lock().iter().map(|s| s.snapshot()).collect();
		let totals = self.totals.lock().clone();
		let live_frames: u64 = streams.iter().map(|s| s.frames_captured).sum();
		let (mode, source_count, next_source_index) = {
			let queue = self.queue.lock();
			(queue.mode(), queue.len(), queue.cursor())
		};
		OrchestratorStats {
			running: self.is_running(),
			uptime_secs: self.uptime().as_secs(),
			max_concurrent: self.config.streams.max_concurrent,
			active_streams: streams.iter().filter(|s| !s.state.is_terminal()).count(),
			rotation_mode: mode,
			source_count,
			next_source_index,
			total_frames_captured: totals.frames_captured + live_frames,
			totals,
			streams,
			uplink: self.uplink.stats(),
		}
	}

	pub fn status_report(&self) -> StatusReport {
		let stats = self.stats();
		let connected = self.uplink.is_connected();
		let state = if self.stopping.load(Ordering::SeqCst) {
			AgentState::Stopping
		} else if connected && stats.active_streams >= stats.max_concurrent {
			AgentState::Watching
		} else {
			AgentState::Degraded
		};
		StatusReport {
			agent_id: self.uplink.agent_id(),
			state,
			active_streams: stats.active_streams,
			total_frames_captured: stats.total_frames_captured,
			total_observations_sent: stats.uplink.observations_sent,
			uplink_connected: connected,
			queued_observations: stats.uplink.queued,
			timestamp: Utc::now(),
		}
	}

	/// Builds a status report, pushes it upstream and raises it as an event.
	pub async fn report_status(&self) -> StatusReport {
		let report = self.status_report();
		tracing::debug!(
			target: "watcher.orchestrator",
			state = ?report.state,
			active = report.active_streams,
			frames = report.total_frames_captured,
			queued = report.queued_observations,
			"status report"
		);
		self.uplink.send_status(report.clone()).await;
		self.events.emit(OrchestratorEvent::Status(report.clone()));
		report
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	pub fn uptime(&self) -> Duration {
		self.started_at
			.lock()
			.map(|at| at.elapsed())
			.unwrap_or_default()
	}

	pub fn uplink(&self) -> &UplinkChannel {
		&self.uplink
	}

	pub fn subscribe(&self) -> EventStream<OrchestratorEvent> {
		self.events.subscribe()
	}

	pub fn events(&self) -> &EventBus<OrchestratorEvent> {
		&self.events
	}

	fn find(&self, stream_id: &str) -> Result<Arc<StreamSession>> {
		self.sessions
			.lock()
			.iter()
			.find(|s| s.id() == stream_id)
			.cloned()
			.ok_or_else(|| Error::UnknownStream(stream_id.to_string()))
	}

	/// Starts sessions for free slots, in cursor order, concurrently.
	async fn fill_slots(&self) -> Vec<String> {
		let free = self
			.config
			.streams
			.max_concurrent
			.saturating_sub(self.sessions.lock().len());
		let sources: Vec<Source> = {
			let mut queue = self.queue.lock();
			(0..free).filter_map(|_| queue.next_source()).collect()
		};

		let results = join_all(sources.into_iter().map(|source| self.start_session(source))).await;
		let mut started = Vec::new();
		for session in results.into_iter().flatten() {
			if self.stopping.load(Ordering::SeqCst) {
				if let Err(e) = session.stop().await {
					tracing::debug!(target: "watcher.orchestrator", error = %e, "late session stop failed");
				}
				self.fold(&session);
				continue;
			}
			started.push(session.id().to_string());
			self.sessions.lock().push(session);
		}
		started
	}

	async fn start_session(&self, source: Source) -> Option<Arc<StreamSession>> {
		let sink: Arc<dyn ObservationSink> = Arc::new(self.uplink.clone());
		let result = StreamSession::start(
			source.clone(),
			self.launcher.as_ref(),
			sink,
			Arc::clone(&self.analyzer),
			self.session_options.clone(),
		)
		.await;

		match result {
			Ok(session) => {
				self.totals.lock().sessions_started += 1;
				self.events.emit(OrchestratorEvent::SessionStarted {
					stream_id: session.id().to_string(),
					source: source.name,
				});
				Some(Arc::new(session))
			}
			Err(e) => {
				self.totals.lock().sessions_failed += 1;
				tracing::warn!(
					target: "watcher.orchestrator",
					source = %source.name,
					url = %source.url,
					error = %e,
					"stream session failed to start"
				);
				self.events.emit(OrchestratorEvent::SessionFailed {
					source: source.name,
					error: e.to_string(),
				});
				None
			}
		}
	}

	async fn retire(&self, session: &StreamSession) {
		if let Err(e) = session.stop().await {
			tracing::warn!(
				target: "watcher.orchestrator",
				stream_id = %session.id(),
				error = %e,
				"session did not stop cleanly"
			);
		}
		self.fold(session);
	}

	/// Moves a stopped session's counters into the running totals.
	fn fold(&self, session: &StreamSession) {
		let snapshot = session.snapshot();
		{
			let mut totals = self.totals.lock();
			totals.sessions_completed += 1;
			totals.frames_captured += snapshot.frames_captured;
		}
		self.events.emit(OrchestratorEvent::SessionStopped(snapshot));
	}

	fn spawn_timers(self: &Arc<Self>) {
		let rotation = spawn_timer(
			Arc::downgrade(self),
			self.shutdown_tx.subscribe(),
			self.config.streams.rotation_interval(),
			|orchestrator| {
				Box::pin(async move {
					orchestrator.rotate().await;
				})
			},
		);
		let status = spawn_timer(
			Arc::downgrade(self),
			self.shutdown_tx.subscribe(),
			self.config.streams.status_interval(),
			|orchestrator| {
				Box::pin(async move {
					orchestrator.report_status().await;
				})
			},
		);
		self.timers.lock().extend([rotation, status]);
	}
}

type TimerAction = fn(Arc<Orchestrator>) -> futures::future::BoxFuture<'static, ()>;

/// Runs `action` every `period`, first after one full period, until shutdown.
fn spawn_timer(
	orchestrator: Weak<Orchestrator>,
	mut shutdown: watch::Receiver<bool>,
	period: Duration,
	action: TimerAction,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = shutdown.changed() => break,
				_ = ticker.tick() => {}
			}
			let Some(orchestrator) = orchestrator.upgrade() else {
				break;
			};
			action(orchestrator).await;
		}
	})
}

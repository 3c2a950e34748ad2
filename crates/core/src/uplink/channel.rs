//! Authenticated, reconnecting uplink to the Brain.
//!
//! Lifecycle of one connection:
//!
//! 1. [`Connector::connect`] opens a transport and a reader task
//! 2. The channel sends [`AgentMessage::Auth`] and waits `auth_timeout` for a
//!    reply; silence is treated as success with a locally made-up agent id
//! 3. A dispatch task routes [`BrainMessage`]s until the transport ends
//! 4. Losing an established connection starts the reconnect loop, which
//!    backs off linearly and gives up after `max_attempts`
//!
//! Observations are queued synchronously by [`UplinkChannel::submit`] and
//! shipped in batches by the flush path, which is serialized by an async
//! lock so at most one batch is being written at a time. A written batch
//! stays pending until the Brain acknowledges it; a rejection or a lost
//! connection puts its observations back at the front of the queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;
use watcher_protocol::{
	AGENT_TYPE, AgentMessage, BrainMessage, Observation, ObservationBatch, StatusReport, StreamInfo,
};
use watcher_runtime::{Connector, Transport, TransportParts, WebSocketConnector};

use super::queue::{InFlightBatches, ObservationQueue};
use super::reconnect::ReconnectPolicy;
use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventStream, UplinkEvent};
use crate::stream::ObservationSink;

/// Tunables for an [`UplinkChannel`].
#[derive(Debug, Clone)]
pub struct UplinkOptions {
	pub api_key: String,
	/// Requested agent id, also used when the Brain never answers the handshake.
	pub agent_id: Option<String>,
	pub version: String,
	pub batch_interval: Duration,
	pub batch_max_size: usize,
	pub max_queue_size: usize,
	pub auth_timeout: Duration,
	pub reconnect: ReconnectPolicy,
}

impl UplinkOptions {
	pub fn from_config(config: &WatcherConfig) -> Self {
		let uplink = &config.uplink;
		Self {
			api_key: uplink.api_key.clone(),
			agent_id: config.agent.agent_id.clone(),
			version: config.agent.version.clone(),
			batch_interval: uplink.batch_interval(),
			batch_max_size: uplink.batch_max_size.max(1),
			max_queue_size: uplink.max_queue_size,
			auth_timeout: uplink.auth_timeout(),
			reconnect: ReconnectPolicy::new(uplink.reconnect_interval(), uplink.max_reconnect_attempts),
		}
	}
}

impl Default for UplinkOptions {
	fn default() -> Self {
		Self::from_config(&WatcherConfig::default())
	}
}

/// Counters and connection flags, copied out under a short lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkStats {
	pub connected: bool,
	pub authenticated: bool,
	pub agent_id: Option<String>,
	pub queued: usize,
	/// Observations written but not yet acknowledged.
	pub unacknowledged: usize,
	pub observations_sent: u64,
	pub batches_sent: u64,
	pub batches_acknowledged: u64,
	pub batches_rejected: u64,
	pub send_failures: u64,
	pub dropped_observations: u64,
	pub reconnect_attempts: u32,
	pub gave_up: bool,
}

/// What one flush pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
	pub batches: usize,
	pub observations: usize,
	/// Observations put back after a failed send.
	pub requeued: usize,
	/// The uplink was not ready; nothing was taken off the queue.
	pub skipped: bool,
}

enum AuthReply {
	Accepted { agent_id: String },
	Rejected { code: String, message: String },
}

#[derive(Default)]
struct LinkState {
	connected: bool,
	authenticated: bool,
	handshaking: bool,
	reconnecting: bool,
	closing: bool,
	gave_up: bool,
	generation: u64,
	agent_id: Option<String>,
	observations_sent: u64,
	batches_sent: u64,
	batches_acknowledged: u64,
	batches_rejected: u64,
	send_failures: u64,
	dropped: u64,
	reconnect_attempts: u32,
}

#[derive(Default)]
struct FlushTimer {
	armed: bool,
	generation: u64,
}

#[derive(Default)]
struct StreamRegistry {
	info: HashMap<String, StreamInfo>,
	retired: HashSet<String>,
}

struct Inner {
	options: UplinkOptions,
	connector: Arc<dyn Connector>,
	state: Mutex<LinkState>,
	queue: Mutex<ObservationQueue>,
	in_flight: Mutex<InFlightBatches>,
	streams: Mutex<StreamRegistry>,
	timer: Mutex<FlushTimer>,
	pending_auth: Mutex<Option<oneshot::Sender<AuthReply>>>,
	connection_tasks: Mutex<Vec<JoinHandle<()>>>,
	reconnect_task: Mutex<Option<JoinHandle<()>>>,
	sender: AsyncMutex<Option<Box<dyn Transport>>>,
	flush_lock: AsyncMutex<()>,
	events: EventBus<UplinkEvent>,
}

/// Handle to the uplink. Clones share one connection and one queue.
#[derive(Clone)]
pub struct UplinkChannel {
	inner: Arc<Inner>,
}

impl UplinkChannel {
	pub fn new(connector: Arc<dyn Connector>, options: UplinkOptions) -> Self {
		let queue = ObservationQueue::new(options.max_queue_size);
		Self {
			inner: Arc::new(Inner {
				options,
				connector,
				state: Mutex::new(LinkState::default()),
				queue: Mutex::new(queue),
				in_flight: Mutex::new(InFlightBatches::default()),
				streams: Mutex::new(StreamRegistry::default()),
				timer: Mutex::new(FlushTimer::default()),
				pending_auth: Mutex::new(None),
				connection_tasks: Mutex::new(Vec::new()),
				reconnect_task: Mutex::new(None),
				sender: AsyncMutex::new(None),
				flush_lock: AsyncMutex::new(()),
				events: EventBus::default(),
			}),
		}
	}

	/// Channel dialing `config.uplink.url` over WebSocket.
	pub fn websocket(config: &WatcherConfig) -> Self {
		Self::new(
			Arc::new(WebSocketConnector::new(config.uplink.url.clone())),
			UplinkOptions::from_config(config),
		)
	}

	/// Connects and authenticates, returning the agent id in effect.
	///
	/// # Errors
	///
	/// [`Error::Connect`] if the transport cannot be opened or closes during
	/// the handshake, [`Error::Auth`] if the Brain rejects the credentials.
	/// Neither is retried.
	pub async fn connect(&self) -> Result<String> {
		{
			let mut state = self.inner.state.lock();
			if state.connected && state.authenticated {
				return Ok(state.agent_id.clone().unwrap_or_default());
			}
			state.closing = false;
			state.gave_up = false;
		}
		let leftover = self.inner.requeue_unacknowledged();
		if leftover > 0 {
			tracing::debug!(target: "watcher.uplink", leftover, "requeued observations never acknowledged before disconnect");
		}
		self.inner.establish().await
	}

	/// Queues an observation. Never blocks and never fails.
	pub fn submit(&self, observation: Observation) {
		self.inner.enqueue(observation);
	}

	/// Sends everything currently queued, one batch at a time.
	pub async fn flush(&self) -> FlushOutcome {
		self.inner.flush(true).await
	}

	/// Best-effort status push; failures are only logged.
	pub async fn send_status(&self, report: StatusReport) {
		if !self.is_connected() {
			tracing::debug!(target: "watcher.uplink", "uplink down, status report skipped");
			return;
		}
		if let Err(e) = self.inner.send_message(&AgentMessage::Status(report)).await {
			tracing::debug!(target: "watcher.uplink", error = %e, "status report not sent");
		}
	}

	/// Flushes what it can, then closes the connection. Idempotent.
	///
	/// No reconnect is attempted after this, even if the connection was
	/// already being re-established.
	pub async fn disconnect(&self) {
		let inner = &self.inner;
		inner.state.lock().closing = true;
		let reconnect = inner.reconnect_task.lock().take();
		if let Some(task) = reconnect {
			task.abort();
		}
		inner.disarm_timer();

		let outcome = inner.flush(true).await;
		if outcome.requeued > 0 || (outcome.skipped && !inner.queue.lock().is_empty()) {
			tracing::warn!(
				target: "watcher.uplink",
				pending = inner.queue.lock().len(),
				"disconnecting with unsent observations"
			);
		}
		let unacknowledged = inner.in_flight.lock().observations();
		if unacknowledged > 0 {
			tracing::debug!(
				target: "watcher.uplink",
				unacknowledged,
				"disconnecting before every batch was acknowledged"
			);
		}

		let was_connected = {
			let mut state = inner.state.lock();
			let was_connected = state.connected;
			state.connected = false;
			state.authenticated = false;
			state.reconnecting = false;
			state.generation += 1;
			was_connected
		};
		let sender = inner.sender.lock().await.take();
		if let Some(mut sender) = sender {
			if let Err(e) = sender.close().await {
				tracing::debug!(target: "watcher.uplink", error = %e, "transport close failed");
			}
		}
		for task in inner.connection_tasks.lock().drain(..) {
			task.abort();
		}
		inner.pending_auth.lock().take();

		if was_connected {
			tracing::info!(target: "watcher.uplink", "uplink disconnected");
			inner.events.emit(UplinkEvent::Disconnected {
				reason: "shutdown".into(),
			});
		}
	}

	/// Connected and past the handshake.
	pub fn is_connected(&self) -> bool {
		let state = self.inner.state.lock();
		state.connected && state.authenticated
	}

	pub fn agent_id(&self) -> Option<String> {
		self.inner.state.lock().agent_id.clone()
	}

	pub fn queued(&self) -> usize {
		self.inner.queue.lock().len()
	}

	pub fn stats(&self) -> UplinkStats {
		let queued = self.queued();
		let unacknowledged = self.inner.in_flight.lock().observations();
		let state = self.inner.state.lock();
		UplinkStats {
			connected: state.connected,
			authenticated: state.authenticated,
			agent_id: state.agent_id.clone(),
			queued,
			unacknowledged,
			observations_sent: state.observations_sent,
			batches_sent: state.batches_sent,
			batches_acknowledged: state.batches_acknowledged,
			batches_rejected: state.batches_rejected,
			send_failures: state.send_failures,
			dropped_observations: state.dropped,
			reconnect_attempts: state.reconnect_attempts,
			gave_up: state.gave_up,
		}
	}

	pub fn subscribe(&self) -> EventStream<UplinkEvent> {
		self.inner.events.subscribe()
	}

	pub fn events(&self) -> &EventBus<UplinkEvent> {
		&self.inner.events
	}
}

impl ObservationSink for UplinkChannel {
	fn submit(&self, observation: Observation) {
		self.inner.enqueue(observation);
	}

	fn update_stream(&self, info: StreamInfo) {
		let mut streams = self.inner.streams.lock();
		streams.retired.remove(&info.stream_id);
		streams.info.insert(info.stream_id.clone(), info);
	}

	fn remove_stream(&self, stream_id: &str) {
		self.inner.streams.lock().retired.insert(stream_id.to_string());
		if let Ok(_flushing) = self.inner.flush_lock.try_lock() {
			self.inner.prune_retired();
		}
	}
}

impl Inner {
	async fn establish(self: &Arc<Self>) -> Result<String> {
		let endpoint = self.connector.endpoint().to_string();
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = self
			.connector
			.connect()
			.await
			.map_err(|e| Error::Connect(format!("{endpoint}: {e}")))?;

		let (auth_tx, auth_rx) = oneshot::channel();
		*self.pending_auth.lock() = Some(auth_tx);
		let generation = {
			let mut state = self.state.lock();
			state.generation += 1;
			state.connected = true;
			state.authenticated = false;
			state.handshaking = true;
			state.generation
		};
		*self.sender.lock().await = Some(sender);

		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::debug!(target: "watcher.uplink", error = %e, "uplink read ended with error");
			}
		});
		let dispatcher = tokio::spawn(Arc::clone(self).dispatch(message_rx, generation));
		for stale in self.connection_tasks.lock().drain(..) {
			stale.abort();
		}
		self.connection_tasks.lock().extend([reader, dispatcher]);

		let auth = AgentMessage::Auth {
			agent_type: AGENT_TYPE.to_string(),
			api_key: self.options.api_key.clone(),
			agent_id: self.options.agent_id.clone(),
			version: self.options.version.clone(),
		};
		if let Err(e) = self.send_message(&auth).await {
			self.abandon(generation).await;
			return Err(Error::Connect(format!("{endpoint}: handshake send failed: {e}")));
		}

		let (agent_id, synthesized) =
			match tokio::time::timeout(self.options.auth_timeout, auth_rx).await {
				Ok(Ok(AuthReply::Accepted { agent_id })) => (agent_id, false),
				Ok(Ok(AuthReply::Rejected { code, message })) => {
					self.abandon(generation).await;
					tracing::error!(target: "watcher.uplink", %code, %message, "authentication rejected");
					self.events.emit(UplinkEvent::AuthRejected {
						code: code.clone(),
						message: message.clone(),
					});
					return Err(Error::Auth { code, message });
				}
				Ok(Err(_)) => {
					self.abandon(generation).await;
					return Err(Error::Connect(format!(
						"{endpoint}: connection closed during handshake"
					)));
				}
				Err(_) => {
					self.pending_auth.lock().take();
					let agent_id = self
						.options
						.agent_id
						.clone()
						.unwrap_or_else(synthesize_agent_id);
					tracing::warn!(
						target: "watcher.uplink",
						%agent_id,
						timeout_ms = self.options.auth_timeout.as_millis() as u64,
						"no handshake reply, continuing with local agent id"
					);
					(agent_id, true)
				}
			};

		{
			let mut state = self.state.lock();
			if state.generation != generation || !state.connected {
				state.handshaking = false;
				return Err(Error::Connect(format!(
					"{endpoint}: connection closed during handshake"
				)));
			}
			state.handshaking = false;
			state.authenticated = true;
			state.reconnecting = false;
			state.reconnect_attempts = 0;
			state.agent_id = Some(agent_id.clone());
		}
		tracing::info!(target: "watcher.uplink", %agent_id, synthesized, endpoint = %endpoint, "uplink connected");
		self.events.emit(UplinkEvent::Connected {
			agent_id: agent_id.clone(),
			synthesized,
		});
		if !self.queue.lock().is_empty() {
			self.arm_timer();
		}
		Ok(agent_id)
	}

	/// Tears down a connection whose handshake failed.
	async fn abandon(&self, generation: u64) {
		{
			let mut state = self.state.lock();
			state.handshaking = false;
			if state.generation == generation {
				state.generation += 1;
				state.connected = false;
				state.authenticated = false;
			}
		}
		self.pending_auth.lock().take();
		let sender = self.sender.lock().await.take();
		if let Some(mut sender) = sender {
			let _ = sender.close().await;
		}
		for task in self.connection_tasks.lock().drain(..) {
			task.abort();
		}
	}

	async fn dispatch(self: Arc<Self>, mut message_rx: mpsc::UnboundedReceiver<serde_json::Value>, generation: u64) {
		while let Some(value) = message_rx.recv().await {
			self.handle_inbound(value);
		}
		self.connection_lost(generation).await;
	}

	fn handle_inbound(self: &Arc<Self>, value: serde_json::Value) {
		let message: BrainMessage = match serde_json::from_value(value) {
			Ok(message) => message,
			Err(e) => {
				tracing::debug!(target: "watcher.uplink", error = %e, "ignoring unrecognised uplink message");
				return;
			}
		};

		match message {
			BrainMessage::AuthSuccess { agent_id, .. } => {
				let pending = self.pending_auth.lock().take();
				match pending {
					Some(tx) => {
						let _ = tx.send(AuthReply::Accepted { agent_id });
					}
					None => {
						tracing::info!(target: "watcher.uplink", %agent_id, "late handshake reply, adopting agent id");
						self.state.lock().agent_id = Some(agent_id);
					}
				}
			}
			BrainMessage::AuthError { error, code } => {
				let code = code.unwrap_or_else(|| "AUTH_ERROR".to_string());
				let pending = self.pending_auth.lock().take();
				match pending {
					Some(tx) => {
						let _ = tx.send(AuthReply::Rejected { code, message: error });
					}
					None => {
						tracing::warn!(target: "watcher.uplink", %code, %error, "auth error after handshake");
						self.events.emit(UplinkEvent::AuthRejected { code, message: error });
					}
				}
			}
			BrainMessage::ObservationsAck { batch_id, received } => {
				let pending = self.in_flight.lock().remove(&batch_id).is_some();
				self.state.lock().batches_acknowledged += 1;
				tracing::debug!(target: "watcher.uplink", %batch_id, received, pending, "batch acknowledged");
				self.events.emit(UplinkEvent::BatchAcknowledged { batch_id, received });
			}
			BrainMessage::ObservationsError { batch_id, error } => {
				let rejected = self.in_flight.lock().remove(&batch_id);
				let requeued = rejected.as_ref().map_or(0, Vec::len);
				if let Some(observations) = rejected {
					self.queue.lock().requeue_front(observations);
					self.arm_timer();
				}
				self.state.lock().batches_rejected += 1;
				tracing::warn!(target: "watcher.uplink", %batch_id, %error, requeued, "batch rejected by brain");
				self.events.emit(UplinkEvent::BatchRejected { batch_id, error });
			}
			BrainMessage::Command(command) => {
				tracing::info!(
					target: "watcher.uplink",
					command_id = %command.command_id,
					command = %command.command,
					"command received"
				);
				self.events.emit(UplinkEvent::Command(command));
			}
		}
	}

	async fn connection_lost(self: Arc<Self>, generation: u64) {
		let reconnect = {
			let mut state = self.state.lock();
			if state.generation != generation {
				return;
			}
			state.connected = false;
			state.authenticated = false;
			let reconnect = !state.closing && !state.handshaking && !state.reconnecting;
			if reconnect {
				state.reconnecting = true;
			}
			reconnect
		};
		self.pending_auth.lock().take();
		self.sender.lock().await.take();
		let requeued = self.requeue_unacknowledged();
		if requeued > 0 {
			tracing::info!(target: "watcher.uplink", requeued, "requeued unacknowledged observations");
		}

		if !reconnect {
			return;
		}
		tracing::warn!(target: "watcher.uplink", "uplink connection lost");
		self.events.emit(UplinkEvent::Disconnected {
			reason: "connection lost".into(),
		});
		let inner = Arc::clone(&self);
		let task = tokio::spawn(inner.reconnect_loop());
		*self.reconnect_task.lock() = Some(task);
	}

	/// Boxed so the establish/dispatch/reconnect cycle has a nameable `Send` future.
	fn reconnect_loop(self: Arc<Self>) -> BoxFuture<'static, ()> {
		Box::pin(async move {
			let mut attempt = 0;
			loop {
				attempt += 1;
				let Some(delay) = self.options.reconnect.delay_for(attempt) else {
					let attempts = attempt - 1;
					{
						let mut state = self.state.lock();
						state.reconnecting = false;
						state.gave_up = true;
					}
					tracing::error!(target: "watcher.uplink", attempts, "giving up on uplink reconnection");
					self.events.emit(UplinkEvent::MaxReconnectExceeded { attempts });
					return;
				};

				self.state.lock().reconnect_attempts = attempt;
				tracing::info!(
					target: "watcher.uplink",
					attempt,
					delay_ms = delay.as_millis() as u64,
					"scheduling uplink reconnect"
				);
				self.events.emit(UplinkEvent::ReconnectScheduled { attempt, delay });
				tokio::time::sleep(delay).await;

				{
					let mut state = self.state.lock();
					if state.closing || (state.connected && state.authenticated) {
						state.reconnecting = false;
						return;
					}
				}
				match self.establish().await {
					Ok(_) => {
						tracing::info!(target: "watcher.uplink", attempt, "uplink reconnected");
						self.events.emit(UplinkEvent::Reconnected { attempt });
						return;
					}
					Err(e @ Error::Auth { .. }) => {
						{
							let mut state = self.state.lock();
							state.reconnecting = false;
							state.gave_up = true;
						}
						tracing::error!(target: "watcher.uplink", error = %e, "reconnect rejected, not retrying");
						return;
					}
					Err(e) => {
						tracing::warn!(target: "watcher.uplink", attempt, error = %e, "uplink reconnect attempt failed");
					}
				}
			}
		})
	}

	fn enqueue(self: &Arc<Self>, observation: Observation) {
		let (evicted, len) = {
			let mut queue = self.queue.lock();
			let evicted = queue.push(observation);
			(evicted, queue.len())
		};

		if evicted {
			let total = {
				let mut state = self.state.lock();
				state.dropped += 1;
				state.dropped
			};
			if total == 1 || total % 100 == 0 {
				tracing::warn!(
					target: "watcher.uplink",
					dropped_total = total,
					capacity = self.options.max_queue_size,
					"observation queue full, dropping oldest"
				);
				self.events.emit(UplinkEvent::ObservationsDropped { total });
			}
		}

		if len >= self.options.batch_max_size {
			self.disarm_timer();
			let inner = Arc::clone(self);
			tokio::spawn(async move {
				inner.flush(false).await;
			});
		} else {
			self.arm_timer();
		}
	}

	/// Schedules a flush `batch_interval` from now unless one is pending.
	fn arm_timer(self: &Arc<Self>) {
		let generation = {
			let mut timer = self.timer.lock();
			if timer.armed {
				return;
			}
			timer.armed = true;
			timer.generation += 1;
			timer.generation
		};
		let inner = Arc::clone(self);
		let interval = self.options.batch_interval;
		tokio::spawn(async move {
			tokio::time::sleep(interval).await;
			{
				let mut timer = inner.timer.lock();
				if !timer.armed || timer.generation != generation {
					return;
				}
				timer.armed = false;
			}
			inner.flush(false).await;
		});
	}

	fn disarm_timer(&self) {
		let mut timer = self.timer.lock();
		timer.armed = false;
		timer.generation += 1;
	}

	/// One flush pass. Without `drain` a trailing partial batch is left for
	/// the timer.
	async fn flush(self: &Arc<Self>, drain: bool) -> FlushOutcome {
		let _flushing = self.flush_lock.lock().await;
		let mut outcome = FlushOutcome::default();

		loop {
			let agent_id = {
				let state = self.state.lock();
				if !(state.connected && state.authenticated) {
					None
				} else {
					Some(state.agent_id.clone().unwrap_or_default())
				}
			};
			let Some(agent_id) = agent_id else {
				if !self.queue.lock().is_empty() {
					tracing::debug!(target: "watcher.uplink", "uplink not ready, holding observations");
				}
				outcome.skipped = true;
				break;
			};

			let observations = self.queue.lock().take_batch(self.options.batch_max_size);
			if observations.is_empty() {
				break;
			}
			let batch = self.build_batch(agent_id, observations);
			let batch_id = batch.batch_id.to_string();
			let count = batch.len();
			let message = AgentMessage::Observations(batch);
			let value = match serde_json::to_value(&message) {
				Ok(value) => value,
				Err(e) => {
					if let AgentMessage::Observations(batch) = message {
						self.queue.lock().requeue_front(batch.observations);
					}
					outcome.requeued += count;
					tracing::error!(target: "watcher.uplink", %batch_id, error = %e, "batch could not be encoded");
					break;
				}
			};
			// Pending before the write so an ack racing the send finds it.
			if let AgentMessage::Observations(batch) = message {
				self.in_flight.lock().insert(batch_id.clone(), batch.observations);
			}

			match self.send_value(value).await {
				Ok(()) => {
					{
						let mut state = self.state.lock();
						state.batches_sent += 1;
						state.observations_sent += count as u64;
					}
					outcome.batches += 1;
					outcome.observations += count;
					tracing::debug!(target: "watcher.uplink", %batch_id, count, "sent observation batch");
					self.events.emit(UplinkEvent::BatchSent { batch_id, count });
				}
				Err(e) => {
					// A lost connection may already have requeued it.
					let unsent = self.in_flight.lock().remove(&batch_id);
					if let Some(observations) = unsent {
						self.queue.lock().requeue_front(observations);
						outcome.requeued += count;
					}
					self.state.lock().send_failures += 1;
					tracing::warn!(
						target: "watcher.uplink",
						%batch_id,
						count,
						error = %e,
						"batch send failed, requeued"
					);
					break;
				}
			}

			let remaining = self.queue.lock().len();
			if remaining == 0 || (!drain && remaining < self.options.batch_max_size) {
				break;
			}
		}

		self.prune_retired();
		let pending = !self.queue.lock().is_empty();
		let closing = self.state.lock().closing;
		if pending && !closing {
			self.arm_timer();
		}
		outcome
	}

	fn build_batch(&self, agent_id: String, observations: Vec<Observation>) -> ObservationBatch {
		let streams = self.streams.lock();
		let mut seen = HashSet::new();
		let stream_info = observations
			.iter()
			.filter(|o| seen.insert(o.stream_id.as_str()))
			.filter_map(|o| streams.info.get(&o.stream_id).cloned())
			.collect();
		drop(streams);

		ObservationBatch {
			agent_id,
			batch_id: Uuid::new_v4(),
			observations,
			stream_info,
		}
	}

	/// Forgets context for stopped streams once nothing queued refers to them.
	fn prune_retired(&self) {
		let retired: Vec<String> = self.streams.lock().retired.iter().cloned().collect();
		if retired.is_empty() {
			return;
		}
		let done: Vec<String> = {
			let queue = self.queue.lock();
			let in_flight = self.in_flight.lock();
			retired
				.into_iter()
				.filter(|id| !queue.contains_stream(id) && !in_flight.contains_stream(id))
				.collect()
		};
		let mut streams = self.streams.lock();
		for id in done {
			streams.retired.remove(&id);
			streams.info.remove(&id);
		}
	}

	/// Puts every unacknowledged observation back at the front of the queue.
	fn requeue_unacknowledged(&self) -> usize {
		let pending = self.in_flight.lock().take_all();
		let count = pending.len();
		if count > 0 {
			self.queue.lock().requeue_front(pending);
		}
		count
	}

	async fn send_message(&self, message: &AgentMessage) -> Result<()> {
		self.send_value(serde_json::to_value(message)?).await
	}

	async fn send_value(&self, value: serde_json::Value) -> Result<()> {
		let mut sender = self.sender.lock().await;
		match sender.as_mut() {
			Some(sender) => sender.send(value).await.map_err(|e| Error::Send(e.to_string())),
			None => Err(Error::Send("not connected".into())),
		}
	}
}

fn synthesize_agent_id() -> String {
	format!("watcher-{}", Uuid::new_v4())
}

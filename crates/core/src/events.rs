//! Event fan-out for the uplink and the orchestrator.
//!
//! [`EventBus`] combines a broadcast channel with predicate waiters:
//!
//! 1. **Streams**: [`EventBus::subscribe`] wrapped in an [`EventStream`]
//! 2. **Waiters**: [`EventBus::register_waiter`] resolves on the first match
//!
//! Waiters are served before the broadcast so a `wait_for` caller never misses
//! its event to receiver lag.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use watcher_protocol::{Command, StatusReport};

use crate::error::{Error, Result};
use crate::stream::SessionSnapshot;

struct WaiterEntry<E> {
	predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
	complete_tx: oneshot::Sender<E>,
}

pub struct EventBus<E: Clone + Send + 'static> {
	tx: broadcast::Sender<E>,
	waiters: Mutex<Vec<WaiterEntry<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self {
			tx,
			waiters: Mutex::new(Vec::new()),
		}
	}

	/// Delivers `event` to matching waiters, then to every subscriber.
	pub fn emit(&self, event: E) {
		{
			let mut waiters = self.waiters.lock();
			let mut i = 0;
			while i < waiters.len() {
				if waiters[i].complete_tx.is_closed() {
					waiters.swap_remove(i);
				} else if (waiters[i].predicate)(&event) {
					let entry = waiters.swap_remove(i);
					let _ = entry.complete_tx.send(event.clone());
				} else {
					i += 1;
				}
			}
		}
		let _ = self.tx.send(event);
	}

	/// Events emitted before this call are not received.
	pub fn subscribe(&self) -> EventStream<E> {
		EventStream::new(self.tx.subscribe())
	}

	pub fn register_waiter<F>(&self, predicate: F) -> oneshot::Receiver<E>
	where
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let (complete_tx, complete_rx) = oneshot::channel();
		self.waiters.lock().push(WaiterEntry {
			predicate: Box::new(predicate),
			complete_tx,
		});
		complete_rx
	}

	/// Waits up to `timeout` for the first event matching `predicate`.
	pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<E>
	where
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let rx = self.register_waiter(predicate);
		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(event)) => Ok(event),
			_ => Err(Error::Timeout {
				ms: timeout.as_millis() as u64,
				condition: "event".into(),
			}),
		}
	}
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
	fn default() -> Self {
		Self::new(256)
	}
}

/// Broadcast receiver that skips over lag instead of failing.
pub struct EventStream<E: Clone> {
	rx: broadcast::Receiver<E>,
}

impl<E: Clone> EventStream<E> {
	pub fn new(rx: broadcast::Receiver<E>) -> Self {
		Self { rx }
	}

	/// Next event, or `None` once the bus is gone.
	pub async fn recv(&mut self) -> Option<E> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(target: "watcher.events", skipped = n, "event subscriber lagged");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	/// Next event if one is already buffered.
	pub fn try_recv(&mut self) -> Option<E> {
		loop {
			match self.rx.try_recv() {
				Ok(event) => return Some(event),
				Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
				Err(_) => return None,
			}
		}
	}
}

/// Connection and delivery events raised by the [`UplinkChannel`](crate::UplinkChannel).
#[derive(Debug, Clone, PartialEq)]
pub enum UplinkEvent {
	/// Handshake finished. `synthesized` is set when the Brain never answered
	/// and the agent id was made up locally.
	Connected { agent_id: String, synthesized: bool },
	Disconnected { reason: String },
	ReconnectScheduled { attempt: u32, delay: Duration },
	Reconnected { attempt: u32 },
	MaxReconnectExceeded { attempts: u32 },
	AuthRejected { code: String, message: String },
	BatchSent { batch_id: String, count: usize },
	BatchAcknowledged { batch_id: String, received: usize },
	BatchRejected { batch_id: String, error: String },
	/// Running total of observations evicted from a full queue.
	ObservationsDropped { total: u64 },
	/// Command pushed by the Brain; interpretation is left to the embedder.
	Command(Command),
}

/// Lifecycle events raised by the [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
	SessionStarted { stream_id: String, source: String },
	SessionFailed { source: String, error: String },
	SessionStopped(SessionSnapshot),
	Rotated { retired: Vec<String>, started: Vec<String> },
	Status(StatusReport),
}

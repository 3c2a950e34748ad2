//! Fake transport for unit testing connection and uplink logic.
//!
//! Provides an in-memory transport so protocol layers can be exercised
//! without sockets.
//!
//! # Example
//!
//! ```ignore
//! let connector = FakeConnector::new();
//! let parts = connector.connect().await?;
//! let controller = connector.latest().unwrap();
//!
//! controller.inject(json!({"type": "auth_success", "agentId": "a"}));
//! let sent = controller.take_sent();
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{Connector, Transport, TransportParts, TransportReceiver};

/// Computes an automatic reply for a sent message.
pub type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Builder for creating fake transport instances.
#[derive(Default)]
pub struct FakeTransportBuilder {
	responder: Option<Responder>,
}

impl FakeTransportBuilder {
	/// Create a new fake transport builder.
	pub fn new() -> Self {
		Self::default()
	}

	/// Reply to every sent message for which `responder` returns `Some`.
	pub fn responder(mut self, responder: Responder) -> Self {
		self.responder = Some(responder);
		self
	}

	/// Build the fake transport and return both parts and a controller.
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		let controller = FakeTransportController {
			inbound_tx: Arc::new(Mutex::new(Some(inbound_tx))),
			sent: Arc::new(Mutex::new(Vec::new())),
			fail_sends: Arc::new(AtomicBool::new(false)),
			closed: Arc::new(AtomicBool::new(false)),
		};

		let sender = FakeTransportSender {
			controller: controller.clone(),
			responder: self.responder,
		};

		let receiver = FakeTransportReceiver {
			inbound_rx,
			message_tx,
		};

		let parts = TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		};

		(parts, controller)
	}
}

/// Controller for injecting inbound messages and inspecting sent ones.
#[derive(Clone)]
pub struct FakeTransportController {
	inbound_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Value>>>>,
	sent: Arc<Mutex<Vec<Value>>>,
	fail_sends: Arc<AtomicBool>,
	closed: Arc<AtomicBool>,
}

impl FakeTransportController {
	/// Simulate receiving a message from the peer.
	pub fn inject(&self, message: Value) {
		if let Some(tx) = self.inbound_tx.lock().as_ref() {
			let _ = tx.send(message);
		}
	}

	/// Simulate the peer dropping the connection.
	pub fn drop_connection(&self) {
		self.inbound_tx.lock().take();
	}

	/// Make subsequent sends fail (or succeed again).
	pub fn fail_sends(&self, fail: bool) {
		self.fail_sends.store(fail, Ordering::SeqCst);
	}

	/// Copy of every message sent so far.
	pub fn sent(&self) -> Vec<Value> {
		self.sent.lock().clone()
	}

	/// Take all sent messages, clearing the buffer.
	pub fn take_sent(&self) -> Vec<Value> {
		std::mem::take(&mut *self.sent.lock())
	}

	/// Sent messages whose `type` field equals `kind`.
	pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
		self.sent
			.lock()
			.iter()
			.filter(|m| m.get("type").and_then(Value::as_str) == Some(kind))
			.cloned()
			.collect()
	}

	/// Whether our side called `close`.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

struct FakeTransportSender {
	controller: FakeTransportController,
	responder: Option<Responder>,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			if self.controller.closed.load(Ordering::SeqCst) {
				return Err(Error::TransportError("transport closed".into()));
			}
			if self.controller.fail_sends.load(Ordering::SeqCst) {
				return Err(Error::TransportError("injected send failure".into()));
			}
			let reply = self.responder.as_ref().and_then(|r| r(&message));
			self.controller.sent.lock().push(message);
			if let Some(reply) = reply {
				self.controller.inject(reply);
			}
			Ok(())
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			self.controller.closed.store(true, Ordering::SeqCst);
			self.controller.drop_connection();
			Ok(())
		})
	}
}

struct FakeTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for FakeTransportReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(message) = self.inbound_rx.recv().await {
				if self.message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}

#[derive(Default)]
struct FakeConnectorState {
	refuse_next: AtomicUsize,
	refuse_all: AtomicBool,
	attempts: AtomicUsize,
	responder: Mutex<Option<Responder>>,
	connections: Mutex<Vec<FakeTransportController>>,
}

/// [`Connector`] handing out fake transports, with scriptable refusals.
#[derive(Clone, Default)]
pub struct FakeConnector {
	state: Arc<FakeConnectorState>,
}

impl FakeConnector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every transport opened from now on replies through `responder`.
	pub fn with_responder(self, responder: Responder) -> Self {
		*self.state.responder.lock() = Some(responder);
		self
	}

	/// Refuse the next `n` connection attempts.
	pub fn refuse_next(&self, n: usize) {
		self.state.refuse_next.store(n, Ordering::SeqCst);
	}

	/// Refuse every attempt until switched back off.
	pub fn refuse_all(&self, refuse: bool) {
		self.state.refuse_all.store(refuse, Ordering::SeqCst);
	}

	/// Number of connection attempts, refused ones included.
	pub fn attempts(&self) -> usize {
		self.state.attempts.load(Ordering::SeqCst)
	}

	/// Controllers of every transport opened so far, oldest first.
	pub fn connections(&self) -> Vec<FakeTransportController> {
		self.state.connections.lock().clone()
	}

	/// Controller of the most recently opened transport.
	pub fn latest(&self) -> Option<FakeTransportController> {
		self.state.connections.lock().last().cloned()
	}
}

impl Connector for FakeConnector {
	fn connect(&self) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + '_>> {
		Box::pin(async move {
			self.state.attempts.fetch_add(1, Ordering::SeqCst);

			if self.state.refuse_all.load(Ordering::SeqCst) {
				return Err(Error::ConnectionFailed("connection refused".into()));
			}
			let refused = self
				.state
				.refuse_next
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
				.is_ok();
			if refused {
				return Err(Error::ConnectionFailed("connection refused".into()));
			}

			let mut builder = FakeTransportBuilder::new();
			if let Some(responder) = self.state.responder.lock().clone() {
				builder = builder.responder(responder);
			}
			let (parts, controller) = builder.build();
			self.state.connections.lock().push(controller);
			Ok(parts)
		})
	}

	fn endpoint(&self) -> &str {
		"fake://brain"
	}
}

//! Chrome DevTools Protocol connection
//!
//! Implements request/response correlation on top of a [`TransportParts`]:
//!
//! 1. Caller invokes [`CdpConnection::send_command`] with a method and params
//! 2. Connection allocates an id and parks a oneshot sender under it
//! 3. The writer task serializes the request onto the transport
//! 4. The dispatch task matches the response id and completes the oneshot
//!
//! Events (messages without an id) are logged and dropped; the watcher only
//! issues commands. When the transport closes every pending request fails
//! with [`Error::ChannelClosed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::TransportParts;

type CallbackMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Error payload of a failed CDP command.
#[derive(Debug, Clone, Deserialize)]
struct ErrorPayload {
	#[serde(default)]
	code: i64,
	message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Response {
	id: u64,
	#[serde(default)]
	result: Option<Value>,
	#[serde(default)]
	error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, Deserialize)]
struct Event {
	method: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Message {
	Response(Response),
	Event(Event),
	Unknown(Value),
}

/// Removes the parked callback if the request future is dropped early.
struct CancelGuard {
	id: u64,
	callbacks: CallbackMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.callbacks.lock().remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "removed orphaned CDP callback");
		}
	}
}

/// Request/response connection to one DevTools target.
pub struct CdpConnection {
	last_id: AtomicU64,
	callbacks: CallbackMap,
	outbound_tx: mpsc::UnboundedSender<Value>,
	closed: Arc<AtomicBool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpConnection {
	/// Starts the reader, writer and dispatch tasks for `parts`.
	pub fn start(parts: TransportParts) -> Arc<Self> {
		let TransportParts {
			mut sender,
			receiver,
			mut message_rx,
		} = parts;

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
		let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));
		let closed = Arc::new(AtomicBool::new(false));

		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::debug!(error = %e, "CDP transport read ended with error");
			}
		});

		let writer = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = sender.send(message).await {
					tracing::debug!(error = %e, "CDP transport write error");
					break;
				}
			}
			let _ = sender.close().await;
		});

		let dispatch = {
			let callbacks = Arc::clone(&callbacks);
			let closed = Arc::clone(&closed);
			tokio::spawn(async move {
				while let Some(value) = message_rx.recv().await {
					dispatch(&callbacks, value);
				}
				closed.store(true, Ordering::SeqCst);
				for (_, pending) in callbacks.lock().drain() {
					let _ = pending.send(Err(Error::ChannelClosed));
				}
			})
		};

		Arc::new(Self {
			last_id: AtomicU64::new(0),
			callbacks,
			outbound_tx,
			closed,
			tasks: Mutex::new(vec![reader, writer, dispatch]),
		})
	}

	/// Whether the underlying transport has gone away.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends a command and awaits its result.
	pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);
		let mut guard = CancelGuard {
			id,
			callbacks: Arc::clone(&self.callbacks),
			completed: false,
		};
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		tracing::trace!(id, method, "sending CDP command");

		if self
			.outbound_tx
			.send(json!({ "id": id, "method": method, "params": params }))
			.is_err()
		{
			return Err(Error::ChannelClosed);
		}

		let result = rx.await.map_err(|_| Error::ChannelClosed)?;
		guard.completed = true;
		result
	}

	/// Like [`send_command`](Self::send_command) but bounded by `timeout`.
	pub async fn send_command_with_timeout(
		&self,
		method: &str,
		params: Value,
		timeout: Duration,
	) -> Result<Value> {
		tokio::time::timeout(timeout, self.send_command(method, params))
			.await
			.map_err(|_| Error::Timeout(format!("{method} after {}ms", timeout.as_millis())))?
	}

	/// Stops all background tasks and fails pending commands.
	pub fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
		for (_, pending) in self.callbacks.lock().drain() {
			let _ = pending.send(Err(Error::ChannelClosed));
		}
	}
}

impl Drop for CdpConnection {
	fn drop(&mut self) {
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

fn dispatch(callbacks: &CallbackMap, value: Value) {
	match serde_json::from_value::<Message>(value) {
		Ok(Message::Response(response)) => {
			let Some(callback) = callbacks.lock().remove(&response.id) else {
				tracing::debug!(id = response.id, "CDP response for unknown request");
				return;
			};
			let result = match response.error {
				Some(error) => Err(Error::Remote {
					code: error.code,
					message: error.message,
				}),
				None => Ok(response.result.unwrap_or(Value::Null)),
			};
			let _ = callback.send(result);
		}
		Ok(Message::Event(event)) => {
			tracing::trace!(method = %event.method, "ignoring CDP event");
		}
		Ok(Message::Unknown(value)) => {
			tracing::debug!(message = %value, "unrecognised CDP message");
		}
		Err(e) => {
			tracing::debug!(error = %e, "failed to parse CDP message");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fake_transport::{FakeTransportBuilder, Responder};

	fn echo_responder() -> Responder {
		Arc::new(|msg: &Value| {
			let id = msg["id"].as_u64()?;
			match msg["method"].as_str()? {
				"Page.navigate" => Some(json!({ "id": id, "result": { "frameId": "F1" } })),
				"Page.fail" => Some(json!({
					"id": id,
					"error": { "code": -32000, "message": "No target with given id found" }
				})),
				_ => None,
			}
		})
	}

	#[tokio::test]
	async fn test_command_correlates_response() {
		let (parts, controller) = FakeTransportBuilder::new().responder(echo_responder()).build();
		let conn = CdpConnection::start(parts);

		let result = conn
			.send_command("Page.navigate", json!({ "url": "https://example.com" }))
			.await
			.unwrap();
		assert_eq!(result["frameId"], "F1");

		let sent = controller.sent();
		assert_eq!(sent[0]["id"], 1);
		assert_eq!(sent[0]["params"]["url"], "https://example.com");
	}

	#[tokio::test]
	async fn test_remote_error_maps_to_target_closed() {
		let (parts, _controller) = FakeTransportBuilder::new().responder(echo_responder()).build();
		let conn = CdpConnection::start(parts);

		let err = conn.send_command("Page.fail", json!({})).await.unwrap_err();
		assert!(err.is_target_closed(), "got {err:?}");
	}

	#[tokio::test]
	async fn test_events_are_ignored() {
		let (parts, controller) = FakeTransportBuilder::new().responder(echo_responder()).build();
		let conn = CdpConnection::start(parts);

		controller.inject(json!({ "method": "Page.loadEventFired", "params": {} }));
		let result = conn.send_command("Page.navigate", json!({})).await.unwrap();
		assert_eq!(result["frameId"], "F1");
	}

	#[tokio::test(start_paused = true)]
	async fn test_timeout_when_no_response() {
		let (parts, _controller) = FakeTransportBuilder::new().build();
		let conn = CdpConnection::start(parts);

		let err = conn
			.send_command_with_timeout("Runtime.evaluate", json!({}), Duration::from_millis(50))
			.await
			.unwrap_err();
		assert!(err.is_timeout());
		assert!(conn.callbacks.lock().is_empty());
	}

	#[tokio::test]
	async fn test_pending_commands_fail_when_peer_drops() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let conn = CdpConnection::start(parts);

		let pending = {
			let conn = Arc::clone(&conn);
			tokio::spawn(async move { conn.send_command("Runtime.evaluate", json!({})).await })
		};
		tokio::task::yield_now().await;
		controller.drop_connection();

		let result = pending.await.unwrap();
		assert!(matches!(result, Err(Error::ChannelClosed)));
		assert!(conn.is_closed());
	}
}

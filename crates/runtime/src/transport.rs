//! JSON message transports.
//!
//! A transport is split into a sending half ([`Transport`]) and a receiving
//! half ([`TransportReceiver`]). The receiver's `run` loop forwards every
//! inbound JSON value into an unbounded channel; when the peer goes away the
//! loop returns and the channel closes, which is how owners observe
//! disconnection.
//!
//! [`Connector`] produces a fresh set of [`TransportParts`] per call so that
//! reconnect logic never reuses a dead socket.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sending half of a transport.
pub trait Transport: Send {
	/// Serializes and writes one message.
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

	/// Closes the connection from our side.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads until the peer closes, forwarding each message.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Both halves of an open transport plus the inbound message channel.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Opens transports to a fixed endpoint.
pub trait Connector: Send + Sync {
	/// Opens a new transport. Resolves once the connection is open.
	fn connect(&self) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + '_>>;

	/// Human-readable endpoint, used in logs.
	fn endpoint(&self) -> &str;
}

/// WebSocket transport speaking one JSON document per text frame.
pub struct WebSocketTransport {
	sink: SplitSink<WsStream, Message>,
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl WebSocketTransport {
	/// Connects to `url` and returns the transport with its inbound channel.
	pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<Value>)> {
		let (ws, _response) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;
		let (sink, stream) = ws.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		tracing::debug!(url, "websocket connected");

		Ok((
			Self {
				sink,
				stream,
				message_tx,
			},
			message_rx,
		))
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		TransportParts {
			sender: Box::new(WebSocketTransportSender { sink: self.sink }),
			receiver: Box::new(WebSocketTransportReceiver {
				stream: self.stream,
				message_tx: self.message_tx,
			}),
			message_rx,
		}
	}
}

struct WebSocketTransportSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(Message::Text(text.into()))
				.await
				.map_err(|e| Error::TransportError(e.to_string()))
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			self.sink
				.close()
				.await
				.map_err(|e| Error::TransportError(e.to_string()))
		})
	}
}

struct WebSocketTransportReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl WebSocketTransportReceiver {
	fn forward(&self, parsed: serde_json::Result<Value>) -> bool {
		match parsed {
			Ok(value) => self.message_tx.send(value).is_ok(),
			Err(e) => {
				tracing::warn!(error = %e, "dropping non-JSON websocket frame");
				true
			}
		}
	}
}

impl TransportReceiver for WebSocketTransportReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let keep_going = match frame {
					Ok(Message::Text(text)) => self.forward(serde_json::from_str(&text)),
					Ok(Message::Binary(bytes)) => self.forward(serde_json::from_slice(&bytes)),
					Ok(Message::Close(_)) => false,
					Ok(_) => true,
					Err(e) => return Err(Error::TransportError(e.to_string())),
				};
				if !keep_going {
					break;
				}
			}
			Ok(())
		})
	}
}

/// [`Connector`] that dials a WebSocket URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
	url: String,
}

impl WebSocketConnector {
	pub fn new(url: impl Into<String>) -> Self {
		Self { url: url.into() }
	}
}

impl Connector for WebSocketConnector {
	fn connect(&self) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + '_>> {
		Box::pin(async move {
			let (transport, message_rx) = WebSocketTransport::connect(&self.url).await?;
			Ok(transport.into_transport_parts(message_rx))
		})
	}

	fn endpoint(&self) -> &str {
		&self.url
	}
}

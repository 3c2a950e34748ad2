//! Stream watcher runtime - transports, DevTools connection, and browser process
//!
//! This crate provides the low-level plumbing the watcher core builds on:
//!
//! - **Transport**: JSON message framing over WebSocket, plus an in-memory fake
//! - **Connector**: opens a fresh transport per (re)connection attempt
//! - **CDP connection**: Chrome DevTools request/response correlation
//! - **Chromium**: launching a local browser and talking to its HTTP endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ watcher-core │  Uplink channel, browser sessions
//! └──────┬───────┘
//!        │ Connector / CdpConnection
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │  CDP   │  │  id correlation
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  WebSocket / fake transport
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │Chromium│  │  Process + /json endpoint
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod cdp;
pub mod chromium;
pub mod error;
pub mod fake_transport;
pub mod transport;

pub use cdp::CdpConnection;
pub use chromium::{BrowserVersion, ChromiumLaunchOptions, ChromiumProcess, DevToolsEndpoint, TargetInfo};
pub use error::{Error, Result};
pub use fake_transport::{FakeConnector, FakeTransportBuilder, FakeTransportController, Responder};
pub use transport::{
	Connector, Transport, TransportParts, TransportReceiver, WebSocketConnector, WebSocketTransport,
};

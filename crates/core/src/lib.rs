//! watcher: stream orchestration and reliable uplink
//!
//! This crate keeps a pool of browser capture sessions pointed at a rotating
//! set of video sources and ships what they observe to the Brain.
//!
//! # Components
//!
//! - [`Orchestrator`] - owns the [`SourceQueue`], keeps `max_concurrent`
//!   [`StreamSession`]s alive, rotates the oldest one on a timer and reports status
//! - [`StreamSession`] - one capture loop against one source, driving a
//!   [`StreamState`] machine with stall detection
//! - [`UplinkChannel`] - authenticated, reconnecting, batched delivery of
//!   observations with requeue on failure
//! - [`browser`] - the [`BrowserSession`] collaborator contract plus a
//!   Chrome DevTools implementation
//! - [`InsightStore`] - deduplicating append-only store for derived insights
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use watcher::{CdpLauncher, Orchestrator, UplinkChannel, WatcherConfig};
//!
//! let config = Arc::new(WatcherConfig::default());
//! let uplink = UplinkChannel::websocket(&config);
//! let launcher = Arc::new(CdpLauncher::new(&config.browser).await?);
//! let orchestrator = Arc::new(Orchestrator::new(config, uplink, launcher));
//!
//! orchestrator.start().await?;
//! tokio::signal::ctrl_c().await?;
//! orchestrator.stop().await;
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod events;
pub mod insight;
pub mod orchestrator;
pub mod source_queue;
pub mod stream;
pub mod uplink;

pub use browser::cdp::CdpLauncher;
pub use browser::{BrowserLauncher, BrowserSession, FrameAnalyzer, NoDetections, PlaybackState};
pub use config::{
	AgentConfig, BrowserConfig, FrameFormat, HealthConfig, InsightConfig, StreamConfig,
	UplinkConfig, WatcherConfig,
};
pub use error::{Error, Result};
pub use events::{EventBus, EventStream, OrchestratorEvent, UplinkEvent};
pub use insight::{Insight, InsightStore};
pub use orchestrator::{Orchestrator, OrchestratorStats, RotationOutcome, Totals};
pub use source_queue::{RotationMode, SourceQueue};
pub use stream::{
	ObservationSink, SessionOptions, SessionSnapshot, StallPolicy, StreamSession, StreamState,
	StreamStateMachine, Transition,
};
pub use uplink::{FlushOutcome, ReconnectPolicy, UplinkChannel, UplinkOptions, UplinkStats};

pub use watcher_protocol as protocol;

//! [`BrowserSession`] over the Chrome DevTools Protocol.
//!
//! Every session is its own page target: [`CdpLauncher::launch`] opens a tab
//! through the DevTools HTTP endpoint, attaches a [`CdpConnection`] to the
//! tab's WebSocket and hands back a [`CdpPage`]. The launcher optionally owns
//! the browser process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex as AsyncMutex;
use watcher_protocol::Source;
use watcher_runtime::{
	CdpConnection, ChromiumLaunchOptions, ChromiumProcess, DevToolsEndpoint, WebSocketTransport,
};

use super::{BrowserLauncher, BrowserSession, PlaybackState, scripts};
use crate::config::{BrowserConfig, FrameFormat};
use crate::error::{Error, Result};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL: Duration = Duration::from_millis(500);

/// Opens page targets on a Chromium reachable over DevTools.
pub struct CdpLauncher {
	config: BrowserConfig,
	endpoint: DevToolsEndpoint,
	process: AsyncMutex<Option<ChromiumProcess>>,
}

impl CdpLauncher {
	/// Launches `config.executable` when set, otherwise attaches to
	/// `config.cdp_endpoint`. Either way the endpoint must answer before this
	/// returns.
	pub async fn new(config: &BrowserConfig) -> Result<Self> {
		let endpoint = DevToolsEndpoint::new(&config.cdp_endpoint)?;
		let process = match &config.executable {
			Some(executable) => {
				let port = endpoint.base().port().unwrap_or(9222);
				let mut options = ChromiumLaunchOptions::new(executable, port);
				options.headless = config.headless;
				options.window_size = (config.viewport_width, config.viewport_height);
				Some(ChromiumProcess::launch(&options).await?)
			}
			None => {
				let version = endpoint.wait_until_ready(Duration::from_secs(5)).await?;
				tracing::info!(
					target: "watcher.browser",
					browser = %version.browser,
					endpoint = %endpoint.base(),
					"attached to running browser"
				);
				None
			}
		};
		Ok(Self {
			config: config.clone(),
			endpoint,
			process: AsyncMutex::new(process),
		})
	}
}

#[async_trait]
impl BrowserLauncher for CdpLauncher {
	async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
		let target = self.endpoint.new_page().await?;
		let ws_url = target
			.web_socket_debugger_url
			.clone()
			.ok_or_else(|| Error::Browser(format!("target {} has no debugger url", target.id)))?;

		let (transport, message_rx) = WebSocketTransport::connect(&ws_url).await?;
		let connection = CdpConnection::start(transport.into_transport_parts(message_rx));
		tracing::debug!(target: "watcher.browser", target_id = %target.id, "opened page target");

		let mut page = CdpPage::new(connection, target.id, self.config.clone())
			.with_endpoint(self.endpoint.clone());
		if let Err(e) = page.prepare().await {
			let _ = page.close().await;
			return Err(e);
		}
		Ok(Box::new(page))
	}

	async fn shutdown(&self) {
		if let Some(process) = self.process.lock().await.take() {
			if let Err(e) = process.shutdown().await {
				tracing::warn!(target: "watcher.browser", error = %e, "browser shutdown failed");
			}
		}
	}
}

/// One DevTools page target.
pub struct CdpPage {
	connection: Arc<CdpConnection>,
	target_id: String,
	config: BrowserConfig,
	endpoint: Option<DevToolsEndpoint>,
	closed: bool,
}

impl CdpPage {
	pub fn new(connection: Arc<CdpConnection>, target_id: String, config: BrowserConfig) -> Self {
		Self {
			connection,
			target_id,
			config,
			endpoint: None,
			closed: false,
		}
	}

	/// Falls back to closing the target over HTTP when the socket is gone.
	pub fn with_endpoint(mut self, endpoint: DevToolsEndpoint) -> Self {
		self.endpoint = Some(endpoint);
		self
	}

	async fn prepare(&mut self) -> Result<()> {
		self.command("Page.enable", json!({})).await?;
		self.command(
			"Emulation.setDeviceMetricsOverride",
			json!({
				"width": self.config.viewport_width,
				"height": self.config.viewport_height,
				"deviceScaleFactor": 1,
				"mobile": false,
			}),
		)
		.await?;
		Ok(())
	}

	async fn command(&self, method: &str, params: Value) -> Result<Value> {
		Ok(self
			.connection
			.send_command_with_timeout(method, params, COMMAND_TIMEOUT)
			.await?)
	}

	async fn evaluate<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
		let result = self
			.command(
				"Runtime.evaluate",
				json!({
					"expression": expression,
					"returnByValue": true,
					"awaitPromise": true,
				}),
			)
			.await?;
		if let Some(exception) = result.get("exceptionDetails") {
			let text = exception
				.pointer("/exception/description")
				.or_else(|| exception.get("text"))
				.and_then(Value::as_str)
				.unwrap_or("unknown exception");
			return Err(Error::Browser(format!("page script threw: {text}")));
		}
		let value = result
			.pointer("/result/value")
			.cloned()
			.unwrap_or(Value::Null);
		Ok(serde_json::from_value(value)?)
	}

	async fn wait_for_video(&self, url: &str) -> Result<()> {
		let timeout = self.config.navigation_timeout();
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			if self.config.dismiss_popups {
				match self.evaluate::<u32>(scripts::DISMISS_POPUPS).await {
					Ok(0) => {}
					Ok(n) => tracing::debug!(target: "watcher.browser", dismissed = n, "dismissed overlays"),
					Err(e) if e.is_target_closed() => return Err(e),
					Err(_) => {}
				}
			}
			match self.evaluate::<bool>(scripts::VIDEO_READY).await {
				Ok(true) => return Ok(()),
				Err(e) if e.is_target_closed() => return Err(e),
				_ => {}
			}
			if tokio::time::Instant::now() >= deadline {
				return Err(Error::Navigation {
					url: url.to_string(),
					reason: format!("no playable video within {}ms", timeout.as_millis()),
				});
			}
			tokio::time::sleep(READY_POLL).await;
		}
	}
}

#[async_trait]
impl BrowserSession for CdpPage {
	async fn navigate_to_source(&mut self, source: &Source) -> Result<()> {
		let navigation = self
			.connection
			.send_command_with_timeout(
				"Page.navigate",
				json!({ "url": source.url }),
				self.config.navigation_timeout(),
			)
			.await
			.map_err(|e| Error::Navigation {
				url: source.url.clone(),
				reason: e.to_string(),
			})?;
		if let Some(reason) = navigation.get("errorText").and_then(Value::as_str) {
			return Err(Error::Navigation {
				url: source.url.clone(),
				reason: reason.to_string(),
			});
		}

		self.wait_for_video(&source.url).await?;
		let playing: bool = self.evaluate(scripts::START_PLAYBACK).await.unwrap_or(false);
		tracing::debug!(target: "watcher.browser", url = %source.url, playing, "source loaded");
		Ok(())
	}

	async fn playback_state(&mut self) -> Result<PlaybackState> {
		self.evaluate(scripts::PLAYBACK_STATE).await
	}

	async fn capture_frame(&mut self) -> Result<Option<Vec<u8>>> {
		let mut params = json!({ "format": self.config.frame_format.as_str() });
		if self.config.frame_format == FrameFormat::Jpeg {
			params["quality"] = json!(self.config.frame_quality);
		}
		let result = self.command("Page.captureScreenshot", params).await?;
		let data = result.get("data").and_then(Value::as_str).unwrap_or_default();
		if data.is_empty() {
			return Ok(None);
		}
		let bytes = BASE64
			.decode(data)
			.map_err(|e| Error::Capture(format!("screenshot is not valid base64: {e}")))?;
		Ok(Some(bytes))
	}

	async fn pause(&mut self) -> Result<()> {
		self.evaluate::<bool>(scripts::PAUSE).await.map(|_| ())
	}

	async fn resume(&mut self) -> Result<()> {
		self.evaluate::<bool>(scripts::RESUME).await.map(|_| ())
	}

	async fn close(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;

		let closed_over_socket = !self.connection.is_closed()
			&& self
				.command("Target.closeTarget", json!({ "targetId": self.target_id }))
				.await
				.is_ok();
		if !closed_over_socket {
			if let Some(endpoint) = &self.endpoint {
				if let Err(e) = endpoint.close_target(&self.target_id).await {
					tracing::debug!(target: "watcher.browser", error = %e, "close_target failed");
				}
			}
		}
		self.connection.close();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use watcher_runtime::{FakeTransportBuilder, FakeTransportController, Responder};

	use super::*;

	fn page_responder(state: Value) -> Responder {
		Arc::new(move |msg: &Value| {
			let id = msg["id"].as_u64()?;
			let result = match msg["method"].as_str()? {
				"Page.navigate" => json!({ "frameId": "F1" }),
				"Page.captureScreenshot" => json!({ "data": BASE64.encode(b"\xFF\xD8frame") }),
				"Runtime.evaluate" => {
					let expression = msg["params"]["expression"].as_str()?;
					let value = if expression.contains("isPlaying") {
						state.clone()
					} else if expression.contains("dismissed") {
						json!(0)
					} else {
						json!(true)
					};
					json!({ "result": { "type": "object", "value": value } })
				}
				_ => json!({}),
			};
			Some(json!({ "id": id, "result": result }))
		})
	}

	fn page(state: Value) -> (CdpPage, FakeTransportController) {
		let (parts, controller) = FakeTransportBuilder::new()
			.responder(page_responder(state))
			.build();
		let page = CdpPage::new(CdpConnection::start(parts), "T1".into(), BrowserConfig::default());
		(page, controller)
	}

	#[tokio::test]
	async fn navigate_waits_for_video_and_starts_playback() {
		let (mut page, controller) = page(json!({}));
		page.navigate_to_source(&Source::new("lofi", "https://example.com/watch?v=abc"))
			.await
			.unwrap();

		let methods: Vec<String> = controller
			.sent()
			.iter()
			.map(|m| m["method"].as_str().unwrap_or_default().to_string())
			.collect();
		assert_eq!(methods[0], "Page.navigate");
		assert!(methods.iter().filter(|m| *m == "Runtime.evaluate").count() >= 2);
	}

	#[tokio::test]
	async fn navigation_error_text_is_reported() {
		let responder: Responder = Arc::new(|msg: &Value| {
			let id = msg["id"].as_u64()?;
			Some(json!({ "id": id, "result": { "frameId": "F1", "errorText": "net::ERR_NAME_NOT_RESOLVED" } }))
		});
		let (parts, _controller) = FakeTransportBuilder::new().responder(responder).build();
		let mut page = CdpPage::new(CdpConnection::start(parts), "T1".into(), BrowserConfig::default());

		let err = page
			.navigate_to_source(&Source::new("gone", "https://nowhere.invalid"))
			.await
			.unwrap_err();
		match err {
			Error::Navigation { url, reason } => {
				assert_eq!(url, "https://nowhere.invalid");
				assert!(reason.contains("ERR_NAME_NOT_RESOLVED"));
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn playback_state_parses_page_result() {
		let (mut page, _controller) = page(json!({
			"isPlaying": true,
			"isBuffering": false,
			"currentTime": 42.5,
			"duration": null,
			"videoId": "abc",
			"title": "Live cam",
		}));
		let state = page.playback_state().await.unwrap();
		assert!(state.is_playing);
		assert_eq!(state.current_time, 42.5);
		assert_eq!(state.video_id.as_deref(), Some("abc"));
		assert_eq!(state.duration, None);
	}

	#[tokio::test]
	async fn capture_decodes_screenshot_with_configured_format() {
		let (mut page, controller) = page(json!({}));
		let frame = page.capture_frame().await.unwrap().unwrap();
		assert_eq!(&frame[..2], &[0xFF, 0xD8]);

		let sent = controller.sent();
		assert_eq!(sent[0]["params"]["format"], "jpeg");
		assert_eq!(sent[0]["params"]["quality"], 70);
	}

	#[tokio::test]
	async fn close_is_idempotent() {
		let (mut page, controller) = page(json!({}));
		page.close().await.unwrap();
		page.close().await.unwrap();
		let closes = controller
			.sent()
			.iter()
			.filter(|m| m["method"] == "Target.closeTarget")
			.count();
		assert_eq!(closes, 1);
	}

	#[tokio::test]
	async fn script_exception_surfaces_as_browser_error() {
		let responder: Responder = Arc::new(|msg: &Value| {
			let id = msg["id"].as_u64()?;
			Some(json!({
				"id": id,
				"result": {
					"result": { "type": "object" },
					"exceptionDetails": { "text": "Uncaught", "exception": { "description": "TypeError: boom" } }
				}
			}))
		});
		let (parts, _controller) = FakeTransportBuilder::new().responder(responder).build();
		let mut page = CdpPage::new(CdpConnection::start(parts), "T1".into(), BrowserConfig::default());

		let err = page.playback_state().await.unwrap_err();
		assert!(err.to_string().contains("TypeError: boom"), "{err}");
	}
}

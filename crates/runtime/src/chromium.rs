//! Chromium process management and DevTools HTTP endpoint
//!
//! [`ChromiumProcess`] launches a local browser with remote debugging enabled.
//! [`DevToolsEndpoint`] talks to the `/json/*` HTTP surface of any running
//! browser (launched here or started externally) to create and close page
//! targets.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::{Child, Command};
use url::Url;

use crate::error::{Error, Result};

/// Options for [`ChromiumProcess::launch`].
#[derive(Debug, Clone)]
pub struct ChromiumLaunchOptions {
	pub executable: PathBuf,
	pub port: u16,
	pub headless: bool,
	pub window_size: (u32, u32),
	pub user_data_dir: Option<PathBuf>,
	pub extra_args: Vec<String>,
	pub startup_timeout: Duration,
}

impl ChromiumLaunchOptions {
	pub fn new(executable: impl Into<PathBuf>, port: u16) -> Self {
		Self {
			executable: executable.into(),
			port,
			headless: true,
			window_size: (1280, 720),
			user_data_dir: None,
			extra_args: Vec::new(),
			startup_timeout: Duration::from_secs(20),
		}
	}

	fn args(&self) -> Vec<String> {
		let mut args = vec![
			format!("--remote-debugging-port={}", self.port),
			format!("--window-size={},{}", self.window_size.0, self.window_size.1),
			"--autoplay-policy=no-user-gesture-required".to_string(),
			"--mute-audio".to_string(),
			"--no-first-run".to_string(),
			"--no-default-browser-check".to_string(),
			"--disable-background-timer-throttling".to_string(),
			"--disable-renderer-backgrounding".to_string(),
			"--disable-backgrounding-occluded-windows".to_string(),
		];
		if self.headless {
			args.push("--headless=new".to_string());
		}
		if let Some(dir) = &self.user_data_dir {
			args.push(format!("--user-data-dir={}", dir.display()));
		}
		args.extend(self.extra_args.iter().cloned());
		args.push("about:blank".to_string());
		args
	}
}

/// A Chromium child process with remote debugging enabled.
#[derive(Debug)]
pub struct ChromiumProcess {
	child: Child,
	endpoint: String,
}

impl ChromiumProcess {
	/// Spawns the browser and waits until its DevTools endpoint answers.
	///
	/// # Errors
	///
	/// Returns `Error::LaunchFailed` if the process cannot be spawned or exits
	/// immediately, and `Error::Timeout` if the endpoint never comes up.
	pub async fn launch(options: &ChromiumLaunchOptions) -> Result<Self> {
		let mut cmd = Command::new(&options.executable);
		cmd.args(options.args())
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|e| {
			Error::LaunchFailed(format!("{}: {e}", options.executable.display()))
		})?;

		tokio::time::sleep(Duration::from_millis(100)).await;
		if let Some(status) = child.try_wait()? {
			return Err(Error::LaunchFailed(format!(
				"browser exited immediately with status: {status}"
			)));
		}

		let endpoint = format!("http://127.0.0.1:{}", options.port);
		let devtools = DevToolsEndpoint::new(&endpoint)?;
		let version = devtools.wait_until_ready(options.startup_timeout).await?;
		tracing::info!(
			target: "watcher.browser",
			browser = %version.browser,
			endpoint = %endpoint,
			"chromium launched"
		);

		Ok(Self { child, endpoint })
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Kills the browser and reaps the process.
	pub async fn shutdown(mut self) -> Result<()> {
		if let Err(e) = self.child.start_kill() {
			tracing::debug!(error = %e, "browser already exited");
		}
		self.child.wait().await?;
		Ok(())
	}
}

/// Response of `GET /json/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
	#[serde(rename = "Browser")]
	pub browser: String,
	#[serde(rename = "webSocketDebuggerUrl", default)]
	pub web_socket_debugger_url: Option<String>,
}

/// One entry of `/json/list` or the response of `/json/new`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub web_socket_debugger_url: Option<String>,
}

/// HTTP client for a browser's DevTools endpoint.
#[derive(Debug, Clone)]
pub struct DevToolsEndpoint {
	base: Url,
	client: reqwest::Client,
}

impl DevToolsEndpoint {
	pub fn new(base: &str) -> Result<Self> {
		let mut base = Url::parse(base)
			.map_err(|e| Error::InvalidArgument(format!("DevTools endpoint '{base}': {e}")))?;
		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());
			base.set_path(&path);
		}
		Ok(Self {
			base,
			client: reqwest::Client::new(),
		})
	}

	pub fn base(&self) -> &Url {
		&self.base
	}

	fn url(&self, path: &str) -> Result<Url> {
		self.base
			.join(path)
			.map_err(|e| Error::InvalidArgument(format!("{path}: {e}")))
	}

	pub async fn version(&self) -> Result<BrowserVersion> {
		let response = self
			.client
			.get(self.url("json/version")?)
			.send()
			.await?
			.error_for_status()?;
		Ok(response.json().await?)
	}

	/// Polls `/json/version` until it answers or `timeout` elapses.
	pub async fn wait_until_ready(&self, timeout: Duration) -> Result<BrowserVersion> {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			match self.version().await {
				Ok(version) => return Ok(version),
				Err(e) if tokio::time::Instant::now() >= deadline => {
					return Err(Error::Timeout(format!(
						"DevTools endpoint {} not ready: {e}",
						self.base
					)));
				}
				Err(_) => tokio::time::sleep(Duration::from_millis(200)).await,
			}
		}
	}

	/// Opens a new blank page target.
	pub async fn new_page(&self) -> Result<TargetInfo> {
		let response = self
			.client
			.put(self.url("json/new?about:blank")?)
			.send()
			.await?
			.error_for_status()?;
		let target: TargetInfo = response.json().await?;
		if target.web_socket_debugger_url.is_none() {
			return Err(Error::ProtocolError(format!(
				"target {} has no webSocketDebuggerUrl",
				target.id
			)));
		}
		Ok(target)
	}

	pub async fn close_target(&self, target_id: &str) -> Result<()> {
		self.client
			.get(self.url(&format!("json/close/{target_id}"))?)
			.send()
			.await?
			.error_for_status()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn endpoint_urls_join_under_base() {
		let endpoint = DevToolsEndpoint::new("http://127.0.0.1:9222").unwrap();
		assert_eq!(
			endpoint.url("json/version").unwrap().as_str(),
			"http://127.0.0.1:9222/json/version"
		);
		assert_eq!(
			endpoint.url("json/new?about:blank").unwrap().as_str(),
			"http://127.0.0.1:9222/json/new?about:blank"
		);
	}

	#[test]
	fn invalid_endpoint_is_rejected() {
		assert!(matches!(
			DevToolsEndpoint::new("not a url"),
			Err(Error::InvalidArgument(_))
		));
	}

	#[test]
	fn launch_args_include_debugging_port_and_headless() {
		let mut options = ChromiumLaunchOptions::new("/usr/bin/chromium", 9333);
		options.extra_args.push("--lang=en".into());
		let args = options.args();
		assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
		assert!(args.contains(&"--headless=new".to_string()));
		assert!(args.contains(&"--lang=en".to_string()));
		assert_eq!(args.last().map(String::as_str), Some("about:blank"));
	}

	#[test]
	fn target_info_parses_devtools_json() {
		let target: TargetInfo = serde_json::from_str(
			r#"{"id":"ABC","type":"page","url":"about:blank","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/ABC"}"#,
		)
		.unwrap();
		assert_eq!(target.kind, "page");
		assert!(target.web_socket_debugger_url.unwrap().ends_with("/ABC"));
	}

	#[tokio::test]
	async fn launch_missing_executable_fails() {
		let options = ChromiumLaunchOptions::new("/nonexistent/chromium-binary", 9444);
		let err = ChromiumProcess::launch(&options).await.unwrap_err();
		assert!(matches!(err, Error::LaunchFailed(_)));
	}
}

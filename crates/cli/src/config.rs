//! Configuration file loading and command line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use watcher::WatcherConfig;

use crate::cli::RunArgs;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "watcher.toml";

/// Reads `path`, or `watcher.toml` if present, or falls back to defaults.
pub fn load(path: Option<&Path>) -> Result<WatcherConfig> {
	let path = match path {
		Some(path) => path.to_path_buf(),
		None => {
			let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
			if !fallback.exists() {
				tracing::debug!(target: "watcher.cli", "no config file, using defaults");
				return Ok(WatcherConfig::default());
			}
			fallback
		}
	};

	let text = std::fs::read_to_string(&path)
		.with_context(|| format!("failed to read config {}", path.display()))?;
	let config = parse(&text).with_context(|| format!("invalid config {}", path.display()))?;
	tracing::debug!(
		target: "watcher.cli",
		path = %path.display(),
		sources = config.sources.len(),
		"loaded config"
	);
	Ok(config)
}

pub fn parse(text: &str) -> Result<WatcherConfig> {
	Ok(toml::from_str(text)?)
}

/// Applies flags and their environment variables on top of the file.
pub fn apply_overrides(config: &mut WatcherConfig, args: &RunArgs) {
	if let Some(api_key) = &args.api_key {
		config.uplink.api_key = api_key.clone();
	}
	if let Some(url) = &args.brain_url {
		config.uplink.url = url.clone();
	}
	if let Some(port) = args.health_port {
		config.health.port = Some(port);
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use watcher::RotationMode;
	use watcher::protocol::SourceType;

	use super::*;

	const SAMPLE: &str = r#"
[uplink]
url = "wss://brain.example/agents"
api_key = "from-file"
batch_max_size = 5

[streams]
max_concurrent = 2
rotation_mode = "sequential"

[[sources]]
name = "harbor"
url = "https://example.com/watch?v=harbor"
category = "nature"

[[sources]]
name = "lofi"
url = "https://example.com/playlist?list=lofi"
type = "playlist"
priority = -1
"#;

	#[test]
	fn parses_sections_and_keeps_defaults() {
		let config = parse(SAMPLE).unwrap();
		assert_eq!(config.uplink.url, "wss://brain.example/agents");
		assert_eq!(config.uplink.batch_max_size, 5);
		assert_eq!(config.uplink.batch_interval_ms, 1000);
		assert_eq!(config.streams.max_concurrent, 2);
		assert_eq!(config.streams.rotation_mode, RotationMode::Sequential);
		assert_eq!(config.sources.len(), 2);
		assert_eq!(config.sources[1].kind, SourceType::Playlist);
		assert_eq!(config.sources[1].priority, -1);
		assert_eq!(config.sources[0].category, "nature");
		config.validate().unwrap();
	}

	#[test]
	fn loads_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(SAMPLE.as_bytes()).unwrap();
		let config = load(Some(file.path())).unwrap();
		assert_eq!(config.uplink.api_key, "from-file");
	}

	#[test]
	fn missing_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let err = load(Some(&dir.path().join("absent.toml"))).unwrap_err();
		assert!(format!("{err:#}").contains("failed to read config"));
	}

	#[test]
	fn malformed_file_names_the_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(b"[streams]\nmax_concurrent = \"many\"\n").unwrap();
		let err = load(Some(file.path())).unwrap_err();
		assert!(format!("{err:#}").contains("invalid config"));
	}

	#[test]
	fn flags_override_file_values() {
		let mut config = parse(SAMPLE).unwrap();
		apply_overrides(
			&mut config,
			&RunArgs {
				api_key: Some("from-flag".into()),
				brain_url: None,
				health_port: Some(9100),
			},
		);
		assert_eq!(config.uplink.api_key, "from-flag");
		assert_eq!(config.uplink.url, "wss://brain.example/agents");
		assert_eq!(config.health.port, Some(9100));
	}
}

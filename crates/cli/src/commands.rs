use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use watcher::{
	BrowserLauncher, CdpLauncher, EventStream, Orchestrator, OrchestratorEvent, RotationMode,
	SourceQueue, UplinkChannel, UplinkEvent, WatcherConfig,
};

use crate::cli::{Cli, Commands, RunArgs};
use crate::{config, health};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = config::load(cli.config.as_deref())?;
	match cli.command {
		Commands::Run(args) => {
			config::apply_overrides(&mut config, &args);
			run(config, &args).await
		}
		Commands::Check => check(&config),
	}
}

/// Validates the configuration and prints the order sources will be watched in.
pub fn check(config: &WatcherConfig) -> Result<()> {
	config.validate().context("configuration is invalid")?;
	print!("{}", rotation_summary(config));
	Ok(())
}

pub fn rotation_summary(config: &WatcherConfig) -> String {
	let mode = config.streams.rotation_mode;
	let queue = SourceQueue::new(config.sources.clone(), mode, config.streams.rotation_seed);
	let mut out = format!(
		"brain: {}\nmax concurrent: {}\nrotation: {} every {} min\n",
		config.uplink.url,
		config.streams.max_concurrent,
		mode,
		config.streams.rotation_interval_minutes,
	);
	if mode == RotationMode::Random && config.streams.rotation_seed.is_none() {
		out.push_str("(unseeded shuffle, order differs per run)\n");
	}
	for (i, source) in queue.order().iter().enumerate() {
		out.push_str(&format!(
			"{:>3}. {} [{}] {}\n",
			i + 1,
			source.name,
			source.kind,
			source.url
		));
	}
	out
}

async fn run(config: WatcherConfig, args: &RunArgs) -> Result<()> {
	config.validate().context("configuration is invalid")?;
	tracing::debug!(target: "watcher.cli", health_port = ?args.health_port, "starting watcher");

	let config = Arc::new(config);
	let launcher = Arc::new(
		CdpLauncher::new(&config.browser)
			.await
			.context("browser is not available")?,
	);
	let uplink = UplinkChannel::websocket(&config);
	let orchestrator = Arc::new(Orchestrator::new(
		Arc::clone(&config),
		uplink.clone(),
		launcher.clone(),
	));

	let loggers = [
		tokio::spawn(log_uplink_events(uplink.subscribe())),
		tokio::spawn(log_orchestrator_events(orchestrator.subscribe())),
	];

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let server = match config.health.port {
		Some(port) => {
			let listener = health::bind(port).await?;
			Some(tokio::spawn(health::serve(
				listener,
				Arc::clone(&orchestrator),
				shutdown_rx,
			)))
		}
		None => None,
	};

	if let Err(e) = orchestrator.start().await {
		shutdown_tx.send_replace(true);
		launcher.shutdown().await;
		return Err(e).context("watcher failed to start");
	}

	wait_for_shutdown().await;
	tracing::info!(target: "watcher.cli", "shutdown requested");
	orchestrator.stop().await;

	shutdown_tx.send_replace(true);
	if let Some(server) = server {
		match server.await {
			Ok(Err(e)) => tracing::warn!(target: "watcher.cli", error = %e, "health server failed"),
			Err(e) => tracing::debug!(target: "watcher.cli", error = %e, "health server task ended"),
			Ok(Ok(())) => {}
		}
	}
	for logger in loggers {
		logger.abort();
	}
	Ok(())
}

async fn wait_for_shutdown() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		match signal(SignalKind::terminate()) {
			Ok(mut terminate) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {}
					_ = terminate.recv() => {}
				}
				return;
			}
			Err(e) => {
				tracing::warn!(target: "watcher.cli", error = %e, "SIGTERM handler unavailable");
			}
		}
	}
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(target: "watcher.cli", error = %e, "failed to listen for ctrl-c");
	}
}

async fn log_uplink_events(mut events: EventStream<UplinkEvent>) {
	while let Some(event) = events.recv().await {
		match event {
			UplinkEvent::Connected { agent_id, synthesized } => {
				tracing::info!(target: "watcher.cli", %agent_id, synthesized, "connected to brain");
			}
			UplinkEvent::MaxReconnectExceeded { attempts } => {
				tracing::error!(
					target: "watcher.cli",
					attempts,
					"brain unreachable, continuing without uplink"
				);
			}
			UplinkEvent::Command(command) => {
				tracing::info!(
					target: "watcher.cli",
					command_id = %command.command_id,
					command = %command.command,
					"brain command received (not acted on)"
				);
			}
			other => tracing::debug!(target: "watcher.cli", event = ?other, "uplink event"),
		}
	}
}

async fn log_orchestrator_events(mut events: EventStream<OrchestratorEvent>) {
	while let Some(event) = events.recv().await {
		match event {
			OrchestratorEvent::SessionStarted { stream_id, source } => {
				tracing::info!(target: "watcher.cli", %stream_id, %source, "watching");
			}
			OrchestratorEvent::SessionStopped(snapshot) => {
				tracing::info!(
					target: "watcher.cli",
					stream_id = %snapshot.id,
					source = %snapshot.source_name,
					state = %snapshot.state,
					frames = snapshot.frames_captured,
					"stopped watching"
				);
			}
			OrchestratorEvent::Rotated { retired, started } => {
				tracing::info!(target: "watcher.cli", ?retired, ?started, "rotated");
			}
			other => tracing::debug!(target: "watcher.cli", event = ?other, "orchestrator event"),
		}
	}
}

#[cfg(test)]
mod tests {
	use watcher::protocol::Source;

	use super::*;

	fn config(mode: RotationMode) -> WatcherConfig {
		let mut config = WatcherConfig::default();
		config.uplink.api_key = "k".into();
		config.streams.rotation_mode = mode;
		config.sources = vec![
			Source::new("late", "https://example.com/watch?v=late").with_priority(5),
			Source::new("early", "https://example.com/watch?v=early").with_priority(1),
		];
		config
	}

	#[test]
	fn summary_lists_priority_order() {
		let summary = rotation_summary(&config(RotationMode::Priority));
		let early = summary.find("early").unwrap();
		let late = summary.find("late").unwrap();
		assert!(early < late, "{summary}");
		assert!(summary.contains("rotation: priority every 30 min"));
		assert!(summary.contains("  1. early [video]"));
	}

	#[test]
	fn summary_keeps_sequential_order() {
		let summary = rotation_summary(&config(RotationMode::Sequential));
		assert!(summary.find("late").unwrap() < summary.find("early").unwrap());
	}

	#[test]
	fn unseeded_random_is_flagged() {
		let summary = rotation_summary(&config(RotationMode::Random));
		assert!(summary.contains("unseeded shuffle"));
	}

	#[test]
	fn check_rejects_missing_sources() {
		let mut config = config(RotationMode::Priority);
		config.sources.clear();
		assert!(check(&config).is_err());
	}
}

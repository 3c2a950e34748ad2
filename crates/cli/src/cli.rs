use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "watcher")]
#[command(about = "Watches rotating video sources and streams observations to the Brain")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// TOML configuration file
	#[arg(short, long, global = true, env = "WATCHER_CONFIG", value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Connect to the Brain and watch sources until interrupted
	Run(RunArgs),
	/// Validate the configuration and print the rotation order
	Check,
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
	/// API key presented during the uplink handshake
	#[arg(long, env = "WATCHER_API_KEY", hide_env_values = true)]
	pub api_key: Option<String>,

	/// Brain WebSocket URL (ws:// or wss://)
	#[arg(long, env = "WATCHER_BRAIN_URL", value_name = "URL")]
	pub brain_url: Option<String>,

	/// Serve /health and /stats on this port
	#[arg(long, value_name = "PORT")]
	pub health_port: Option<u16>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_run_with_overrides() {
		let cli = Cli::try_parse_from([
			"watcher",
			"-vv",
			"--config",
			"watcher.toml",
			"run",
			"--api-key",
			"k",
			"--brain-url",
			"wss://brain.example/agents",
			"--health-port",
			"8099",
		])
		.unwrap();
		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.config, Some(PathBuf::from("watcher.toml")));
		let Commands::Run(args) = cli.command else {
			panic!("expected run");
		};
		assert_eq!(args.api_key.as_deref(), Some("k"));
		assert_eq!(args.brain_url.as_deref(), Some("wss://brain.example/agents"));
		assert_eq!(args.health_port, Some(8099));
	}

	#[test]
	fn check_takes_global_config_after_subcommand() {
		let cli = Cli::try_parse_from(["watcher", "check", "-c", "other.toml"]).unwrap();
		assert!(matches!(cli.command, Commands::Check));
		assert_eq!(cli.config, Some(PathBuf::from("other.toml")));
	}

	#[test]
	fn subcommand_is_required() {
		assert!(Cli::try_parse_from(["watcher"]).is_err());
	}
}

use std::path::PathBuf;

use clap::Parser;
use pw_relay_runtime::RelayConfig;
use pw_relay_runtime::config::{DEFAULT_HOST, DEFAULT_PORT};
use url::Url;

/// Relay browser pages to a remote debugging orchestrator.
#[derive(Parser, Debug)]
#[command(name = "pw-relay")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv debug for dependencies)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Control-plane host
	#[arg(long, default_value = DEFAULT_HOST)]
	pub host: String,

	/// Control-plane port; invalid values fall back to the default
	#[arg(long, allow_hyphen_values = true, default_value_t = DEFAULT_PORT.to_string())]
	pub port: String,

	/// Attach every eligible page automatically and keep reconnecting
	#[arg(long)]
	pub always_on: bool,

	/// Browser DevTools HTTP endpoint
	#[arg(long, value_name = "URL", default_value = "http://127.0.0.1:9222")]
	pub chrome: Url,

	/// How often to poll the browser's page list
	#[arg(long, value_name = "MS", default_value_t = 1000)]
	pub poll_interval_ms: u64,

	/// Where to write page status JSON
	#[arg(long, value_name = "FILE")]
	pub state_file: Option<PathBuf>,

	/// Do not read commands from stdin
	#[arg(long)]
	pub no_console: bool,
}

impl Cli {
	pub fn relay_config(&self) -> RelayConfig {
		let mut config = RelayConfig::default()
			.with_host(&self.host)
			.with_port_str(&self.port);
		config.always_on = self.always_on;
		config
	}
}

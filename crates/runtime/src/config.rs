//! Relay configuration.

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Used whenever the configured port is missing or invalid.
pub const DEFAULT_PORT: u16 = 19988;

/// Reconnect delay policy: start at `initial`, double per failure, cap at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
	pub initial: Duration,
	pub max: Duration,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			initial: Duration::from_secs(1),
			max: Duration::from_secs(30),
		}
	}
}

/// Artificial pauses used while pages and backend state settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
	/// Between a page appearing and the first attach attempt (its address is
	/// usually unknown until then).
	pub page_created: Duration,
	/// Between the disable and enable halves of a capability re-enable.
	pub reenable: Duration,
	/// Between creating a surface for the control plane and attaching it.
	pub create_target: Duration,
}

impl Default for SettleDelays {
	fn default() -> Self {
		Self {
			page_created: Duration::from_millis(500),
			reenable: Duration::from_millis(50),
			create_target: Duration::from_millis(300),
		}
	}
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
	pub host: String,
	pub port: u16,
	/// Attach eligible pages automatically and keep reconnecting.
	pub always_on: bool,
	pub preflight_timeout: Duration,
	pub handshake_timeout: Duration,
	pub backoff: BackoffPolicy,
	pub settle: SettleDelays,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
			always_on: false,
			preflight_timeout: Duration::from_secs(2),
			handshake_timeout: Duration::from_secs(5),
			backoff: BackoffPolicy::default(),
			settle: SettleDelays::default(),
		}
	}
}

impl RelayConfig {
	/// Parses a user-supplied port, falling back to [`DEFAULT_PORT`] unless it
	/// is an integer in `1..=65535`.
	pub fn port_from_str(raw: &str) -> u16 {
		match raw.trim().parse::<u32>() {
			Ok(port @ 1..=65535) => port as u16,
			_ => {
				warn!(target = "pw.relay", raw, default = DEFAULT_PORT, "invalid control-plane port, using default");
				DEFAULT_PORT
			}
		}
	}

	pub fn with_host(mut self, host: &str) -> Self {
		let host = host.trim();
		self.host = if host.is_empty() {
			DEFAULT_HOST.to_string()
		} else {
			host.to_string()
		};
		self
	}

	pub fn with_port_str(mut self, raw: &str) -> Self {
		self.port = Self::port_from_str(raw);
		self
	}

	/// Base address probed before opening the persistent connection.
	pub fn preflight_url(&self) -> String {
		format!("http://{}:{}/", self.host, self.port)
	}

	/// Address of the persistent control-plane connection.
	pub fn relay_url(&self) -> String {
		format!("ws://{}:{}/extension", self.host, self.port)
	}
}

//! Reconnect delay sequence.

use std::time::Duration;

use crate::config::BackoffPolicy;

/// Doubling delay with a cap. No jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
	policy: BackoffPolicy,
	current: Duration,
}

impl Backoff {
	pub fn new(policy: BackoffPolicy) -> Self {
		Self {
			policy,
			current: policy.initial,
		}
	}

	/// Returns the current delay, then doubles it up to the cap.
	pub fn next_delay(&mut self) -> Duration {
		let delay = self.current;
		self.current = self.current.saturating_mul(2).min(self.policy.max);
		delay
	}

	/// Restores the initial delay. Called once per successful connection.
	pub fn reset(&mut self) {
		self.current = self.policy.initial;
	}
}

use std::time::Duration;

/// Linear backoff with a bounded number of attempts.
///
/// Attempt `n` (1-based) waits `base * n`. Attempts beyond `max_attempts`
/// have no delay: the caller gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	pub base: Duration,
	pub max_attempts: u32,
}

impl ReconnectPolicy {
	pub fn new(base: Duration, max_attempts: u32) -> Self {
		Self { base, max_attempts }
	}

	pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
		if attempt == 0 || attempt > self.max_attempts {
			return None;
		}
		Some(self.base.saturating_mul(attempt))
	}
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self::new(Duration::from_secs(5), 10)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_grows_linearly() {
		let policy = ReconnectPolicy::new(Duration::from_millis(1000), 3);
		assert_eq!(policy.delay_for(1), Some(Duration::from_millis(1000)));
		assert_eq!(policy.delay_for(2), Some(Duration::from_millis(2000)));
		assert_eq!(policy.delay_for(3), Some(Duration::from_millis(3000)));
		assert_eq!(policy.delay_for(4), None);
	}

	#[test]
	fn huge_base_saturates() {
		let policy = ReconnectPolicy::new(Duration::MAX, 3);
		assert_eq!(policy.delay_for(3), Some(Duration::MAX));
	}

	#[test]
	fn zero_attempts_never_retries() {
		let policy = ReconnectPolicy::new(Duration::from_secs(1), 0);
		assert_eq!(policy.delay_for(1), None);
	}
}

//! Bounded exponential backoff for transient provider failures.
//!
//! Only errors for which [`Error::is_transient`] holds are retried. A `Retry-After` hint from
//! the provider overrides the computed delay, capped at [`RetryPolicy::max_delay`].

// std
use std::time::Duration;
// self
use crate::{_prelude::*, error::TransientError};

/// Exponential backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts including the first one; `1` disables retries.
	pub max_attempts: u32,
	/// Delay before the second attempt.
	pub base_delay: Duration,
	/// Upper bound for any single delay.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Runs the operation once.
	pub const fn no_retry() -> Self {
		Self { max_attempts: 1, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
	}

	/// Creates a policy doubling from `base_delay` up to `max_delay`.
	pub const fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
		Self { max_attempts, base_delay, max_delay }
	}

	/// Delay to sleep after the given failed attempt (1-based).
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));

		self.base_delay.saturating_mul(factor).min(self.max_delay)
	}

	/// Returns `true` when another attempt is allowed after `attempt` failures.
	pub fn should_retry(&self, attempt: u32) -> bool {
		attempt < self.max_attempts
	}

	fn delay_for(&self, attempt: u32, error: &Error) -> Duration {
		match error {
			Error::Transient(TransientError::Upstream { retry_after: Some(hint), .. })
				if hint.is_positive() =>
				Duration::try_from(*hint).unwrap_or(self.max_delay).min(self.max_delay),
			_ => self.delay_for_attempt(attempt),
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::exponential(3, Duration::from_secs(1), Duration::from_secs(8))
	}
}

/// Runs `operation` until it succeeds, fails permanently, or the policy is exhausted.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 1;

	loop {
		match operation().await {
			Ok(value) => return Ok(value),
			Err(e) if e.is_transient() && policy.should_retry(attempt) => {
				let delay = policy.delay_for(attempt, &e);

				tracing::warn!(
					operation = label,
					attempt,
					delay_ms = delay.as_millis() as u64,
					error = %e,
					"Transient failure; retrying.",
				);

				tokio::time::sleep(delay).await;

				attempt += 1;
			},
			Err(e) => return Err(e),
		}
	}
}

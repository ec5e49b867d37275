//! Sliding-window rate limiter gating provider calls.
//!
//! A [`RateLimiter`] admits at most `max_permits` acquisitions inside any trailing `window`.
//! Exhaustion is never an error: [`RateLimiter::acquire`] sleeps until the oldest admission
//! leaves the window. The bookkeeping lock is released before sleeping, so other tasks can
//! still inspect or reset the limiter while a caller waits.

// std
use std::{collections::VecDeque, time::Duration};
// crates.io
use tokio::time::{self, Instant};
// self
use crate::{_prelude::*, error::ConfigError};

/// Permit budget for one provider category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
	max_permits: usize,
	window: Duration,
}
impl RateLimit {
	/// Text generation: 60 calls per minute.
	pub const TEXT_GENERATION: Self = Self { max_permits: 60, window: Duration::from_secs(60) };
	/// Primary image provider: 30 calls per minute.
	pub const IMAGE_PRIMARY: Self = Self { max_permits: 30, window: Duration::from_secs(60) };
	/// Secondary image provider: 30 calls per minute.
	pub const IMAGE_SECONDARY: Self = Self { max_permits: 30, window: Duration::from_secs(60) };

	/// Creates a validated budget; both values must be non-zero.
	pub fn new(max_permits: usize, window: Duration) -> Result<Self, ConfigError> {
		if max_permits == 0 || window.is_zero() {
			return Err(ConfigError::InvalidRateLimit);
		}

		Ok(Self { max_permits, window })
	}

	/// Maximum admissions per window.
	pub fn max_permits(&self) -> usize {
		self.max_permits
	}

	/// Length of the trailing window.
	pub fn window(&self) -> Duration {
		self.window
	}
}

/// Async sliding-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
	limit: RateLimit,
	admitted: AsyncMutex<VecDeque<Instant>>,
}
impl RateLimiter {
	/// Creates a limiter enforcing the given budget.
	pub fn new(limit: RateLimit) -> Self {
		Self { limit, admitted: AsyncMutex::new(VecDeque::with_capacity(limit.max_permits)) }
	}

	/// Budget enforced by this limiter.
	pub fn limit(&self) -> RateLimit {
		self.limit
	}

	/// Waits until a permit is free, consumes it, and returns how long the caller waited.
	pub async fn acquire(&self) -> Duration {
		let started = Instant::now();

		loop {
			let wait = {
				let mut admitted = self.admitted.lock().await;
				let now = Instant::now();

				self.prune(&mut admitted, now);

				if admitted.len() < self.limit.max_permits {
					admitted.push_back(now);

					break;
				}

				self.wait_for(&admitted, now)
			};

			tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached; waiting for a permit.");

			time::sleep(wait).await;
		}

		Instant::now().saturating_duration_since(started)
	}

	/// Consumes a permit if one is free right now.
	pub async fn try_acquire(&self) -> bool {
		let mut admitted = self.admitted.lock().await;
		let now = Instant::now();

		self.prune(&mut admitted, now);

		if admitted.len() < self.limit.max_permits {
			admitted.push_back(now);

			true
		} else {
			false
		}
	}

	/// Time until the next permit frees up; zero when one is available now.
	pub async fn time_until_available(&self) -> Duration {
		let mut admitted = self.admitted.lock().await;
		let now = Instant::now();

		self.prune(&mut admitted, now);

		if admitted.len() < self.limit.max_permits {
			Duration::ZERO
		} else {
			self.wait_for(&admitted, now)
		}
	}

	/// Forgets every recorded admission.
	pub async fn reset(&self) {
		self.admitted.lock().await.clear();
	}

	fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
		while admitted.front().is_some_and(|at| now.saturating_duration_since(*at) >= self.limit.window)
		{
			admitted.pop_front();
		}
	}

	fn wait_for(&self, admitted: &VecDeque<Instant>, now: Instant) -> Duration {
		admitted
			.front()
			.map(|oldest| (*oldest + self.limit.window).saturating_duration_since(now))
			.unwrap_or_default()
	}
}

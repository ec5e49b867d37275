// std
use std::time::Duration;
// crates.io
use tokio::time::Instant;
// self
use artbot_core::{
	_preludet::*,
	ratelimit::{RateLimit, RateLimiter},
};

#[tokio::test(start_paused = true)]
async fn concurrent_acquirers_never_exceed_the_window() {
	let limiter = Arc::new(RateLimiter::new(
		RateLimit::new(3, Duration::from_secs(10)).expect("Rate limit should be valid."),
	));
	let started = Instant::now();
	let mut tasks = Vec::new();

	for _ in 0..7 {
		let limiter = limiter.clone();

		tasks.push(tokio::spawn(async move {
			limiter.acquire().await;

			started.elapsed()
		}));
	}

	let mut admitted = Vec::new();

	for task in tasks {
		admitted.push(task.await.expect("Acquire task should not panic."));
	}

	admitted.sort();

	assert_eq!(
		admitted.iter().map(Duration::as_secs).collect::<Vec<_>>(),
		[0, 0, 0, 10, 10, 10, 20]
	);
}

#[tokio::test(start_paused = true)]
async fn acquire_reports_time_waited() {
	let limiter =
		RateLimiter::new(RateLimit::new(1, Duration::from_secs(5)).expect("Rate limit should be valid."));

	assert_eq!(limiter.acquire().await, Duration::ZERO);
	assert_eq!(limiter.time_until_available().await, Duration::from_secs(5));

	tokio::time::advance(Duration::from_secs(2)).await;

	assert!(!limiter.try_acquire().await);
	assert_eq!(limiter.acquire().await, Duration::from_secs(3));

	limiter.reset().await;

	assert!(limiter.try_acquire().await);
}

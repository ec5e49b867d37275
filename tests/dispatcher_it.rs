// std
use std::{
	sync::atomic::{AtomicUsize, Ordering},
	time::Duration,
};
// crates.io
use tokio::time::Instant;
// self
use artbot_core::{
	_preludet::*,
	dispatch::{Dispatcher, ProviderCategory},
	ratelimit::RateLimit,
};

fn unlimited() -> Dispatcher {
	Dispatcher::with_limits([])
}

#[tokio::test]
async fn failing_job_does_not_stop_later_jobs() {
	let dispatcher = unlimited();
	let done = Arc::new(AtomicUsize::new(0));

	dispatcher.submit(ProviderCategory::TextGeneration, async { Err::<(), _>("boom") });

	for _ in 0..2 {
		let done = done.clone();

		dispatcher.submit(ProviderCategory::TextGeneration, async move {
			done.fetch_add(1, Ordering::SeqCst);

			Ok::<_, BoxError>(())
		});
	}

	assert_eq!(dispatcher.start(1), 1);

	dispatcher.wait_idle().await;

	assert_eq!(done.load(Ordering::SeqCst), 2);
	assert_eq!(dispatcher.metrics().submitted(), 3);
	assert_eq!(dispatcher.metrics().failed(), 1);
	assert_eq!(dispatcher.metrics().succeeded(), 2);
	assert_eq!(dispatcher.pending(), 0);
}

#[tokio::test]
async fn panicking_job_is_isolated() {
	let dispatcher = unlimited();
	let done = Arc::new(AtomicUsize::new(0));

	dispatcher.start(1);
	dispatcher.submit(ProviderCategory::ImageSecondary, async {
		if should_panic() {
			panic!("worker must survive this");
		}

		Ok::<_, BoxError>(())
	});

	let counter = done.clone();

	dispatcher.submit(ProviderCategory::ImageSecondary, async move {
		counter.fetch_add(1, Ordering::SeqCst);

		Ok::<_, BoxError>(())
	});
	dispatcher.wait_idle().await;

	assert_eq!(done.load(Ordering::SeqCst), 1);
	assert_eq!(dispatcher.metrics().panicked(), 1);
	assert_eq!(dispatcher.metrics().succeeded(), 1);
}

fn should_panic() -> bool {
	true
}

#[tokio::test]
async fn start_is_idempotent() {
	let dispatcher = unlimited();

	assert!(!dispatcher.is_started());
	assert_eq!(dispatcher.start(3), 3);
	assert_eq!(dispatcher.start(5), 0);
	assert!(dispatcher.is_started());

	dispatcher.shutdown().await;

	assert!(!dispatcher.is_started());
	assert_eq!(dispatcher.start(0), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_category_spreads_jobs_over_windows() {
	let limit = RateLimit::new(2, Duration::from_secs(1)).expect("Rate limit should be valid.");
	let dispatcher = Dispatcher::with_limits([(ProviderCategory::ImagePrimary, limit)]);
	let started = Instant::now();
	let finished = Arc::new(Mutex::new(Vec::new()));

	for _ in 0..5 {
		let finished = finished.clone();

		dispatcher.submit(ProviderCategory::ImagePrimary, async move {
			finished.lock().push(started.elapsed());

			Ok::<_, BoxError>(())
		});
	}

	dispatcher.start(3);
	dispatcher.wait_idle().await;

	let finished = finished.lock().clone();

	assert_eq!(finished.len(), 5);
	assert!(started.elapsed() >= Duration::from_secs(2));

	for at in &finished {
		let in_window = finished
			.iter()
			.filter(|other| *other <= at && *at - **other < Duration::from_secs(1))
			.count();

		assert!(in_window <= 2, "More than two jobs ran in the second ending at {at:?}.");
	}
}

#[tokio::test(start_paused = true)]
async fn default_category_is_not_rate_limited() {
	let dispatcher = Dispatcher::new();
	let started = Instant::now();

	assert!(dispatcher.limiter(ProviderCategory::Default).is_none());
	assert!(dispatcher.limiter(ProviderCategory::TextGeneration).is_some());

	for _ in 0..100 {
		dispatcher
			.submit(ProviderCategory::from_tag("unknown-provider"), async { Ok::<_, BoxError>(()) });
	}

	dispatcher.start(3);
	dispatcher.wait_idle().await;

	assert_eq!(started.elapsed(), Duration::ZERO);
	assert_eq!(dispatcher.metrics().succeeded(), 100);
}

#[tokio::test]
async fn submit_with_result_delivers_outcome() {
	let dispatcher = unlimited();
	let answer = dispatcher.submit_with_result(ProviderCategory::TextGeneration, async { Ok(21 * 2) });
	let rejected = dispatcher.submit_with_result(ProviderCategory::TextGeneration, async {
		Err::<u8, _>(Error::Provider { status: 400, message: "bad prompt".into() })
	});

	dispatcher.start(2);

	assert_eq!(answer.wait().await.expect("Job should deliver its value."), 42);
	assert!(matches!(rejected.wait().await, Err(Error::Provider { status: 400, .. })));

	dispatcher.wait_idle().await;

	assert_eq!(dispatcher.metrics().failed(), 1);
}

#[tokio::test]
async fn panicking_result_job_reports_lost() {
	let dispatcher = unlimited();
	let handle = dispatcher.submit_with_result(ProviderCategory::Default, async {
		if should_panic() {
			panic!("no result for you");
		}

		Ok(())
	});
	let id = handle.id();

	dispatcher.start(1);

	assert!(matches!(handle.wait().await, Err(Error::JobLost { job_id }) if job_id == id.0));
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_in_flight_and_queued_jobs() {
	let limit = RateLimit::new(1, Duration::from_secs(60)).expect("Rate limit should be valid.");
	let dispatcher = Dispatcher::with_limits([(ProviderCategory::ImagePrimary, limit)]);
	let done = Arc::new(AtomicUsize::new(0));
	let mut handles = Vec::new();

	for _ in 0..3 {
		let done = done.clone();

		handles.push(dispatcher.submit_with_result(ProviderCategory::ImagePrimary, async move {
			done.fetch_add(1, Ordering::SeqCst);

			Ok(())
		}));
	}

	dispatcher.start(1);
	tokio::time::sleep(Duration::from_millis(10)).await;
	dispatcher.shutdown().await;

	assert_eq!(done.load(Ordering::SeqCst), 1);
	assert_eq!(dispatcher.pending(), 0);
	assert_eq!(dispatcher.metrics().dropped(), 2);

	let last = handles.pop().expect("Three handles were created.");

	assert!(matches!(last.wait().await, Err(Error::JobLost { .. })));

	dispatcher.wait_idle().await;
}

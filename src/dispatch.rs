//! Rate-limited job queue drained by a fixed pool of workers.
//!
//! [`Dispatcher::submit`] enqueues an operation tagged with a [`ProviderCategory`] and returns
//! immediately. Workers pull jobs in FIFO order, wait for the category's [`RateLimiter`] (if
//! any), and run the operation. Every failure and panic is caught, logged, and counted inside
//! the worker; nothing crosses back to the submitter unless it asked for a [`JobHandle`].
//!
//! The dispatcher is a cheap-to-clone handle. A process that wants a single shared queue
//! builds one instance and clones it into every consumer.

mod job;
mod metrics;
mod worker;

pub use job::{JobHandle, JobId};
pub use metrics::DispatchMetrics;

// std
use std::{
	convert::Infallible,
	pin,
	sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};
// crates.io
use tokio::{
	sync::{Notify, mpsc, oneshot},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	dispatch::job::Job,
	ratelimit::{RateLimit, RateLimiter},
};

/// Worker count used when the caller has no preference.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Provider family a job talks to; selects the rate limiter that gates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderCategory {
	/// Chat-completion text generation.
	TextGeneration,
	/// Primary image generation provider.
	ImagePrimary,
	/// Secondary (fallback) image generation provider.
	ImageSecondary,
	/// Anything else; runs without rate limiting.
	Default,
}
impl ProviderCategory {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ProviderCategory::TextGeneration => "text",
			ProviderCategory::ImagePrimary => "image-primary",
			ProviderCategory::ImageSecondary => "image-secondary",
			ProviderCategory::Default => "default",
		}
	}

	/// Maps a free-form tag onto a category; unknown tags become [`ProviderCategory::Default`].
	pub fn from_tag(tag: &str) -> Self {
		match tag.trim().to_ascii_lowercase().as_str() {
			"text" | "openai" => ProviderCategory::TextGeneration,
			"image-primary" | "tensorart" => ProviderCategory::ImagePrimary,
			"image-secondary" | "replicate" => ProviderCategory::ImageSecondary,
			_ => ProviderCategory::Default,
		}
	}
}
impl Display for ProviderCategory {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for ProviderCategory {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self::from_tag(s))
	}
}

/// Default per-category budgets.
pub fn default_limits() -> [(ProviderCategory, RateLimit); 3] {
	[
		(ProviderCategory::TextGeneration, RateLimit::TEXT_GENERATION),
		(ProviderCategory::ImagePrimary, RateLimit::IMAGE_PRIMARY),
		(ProviderCategory::ImageSecondary, RateLimit::IMAGE_SECONDARY),
	]
}

pub(crate) struct Shared {
	sender: mpsc::UnboundedSender<Job>,
	receiver: AsyncMutex<mpsc::UnboundedReceiver<Job>>,
	limiters: HashMap<ProviderCategory, Arc<RateLimiter>>,
	workers: Mutex<Vec<JoinHandle<()>>>,
	started: AtomicBool,
	pending: AtomicUsize,
	idle: Notify,
	next_id: AtomicU64,
	metrics: DispatchMetrics,
}
impl Shared {
	fn complete(&self) {
		if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.idle.notify_waiters();
		}
	}
}

/// Handle to the job queue and its worker pool.
#[derive(Clone)]
pub struct Dispatcher {
	shared: Arc<Shared>,
}
impl Dispatcher {
	/// Creates a dispatcher with the default per-category budgets.
	pub fn new() -> Self {
		Self::with_limits(default_limits())
	}

	/// Creates a dispatcher with explicit budgets; categories without one run unlimited.
	pub fn with_limits<I>(limits: I) -> Self
	where
		I: IntoIterator<Item = (ProviderCategory, RateLimit)>,
	{
		let (sender, receiver) = mpsc::unbounded_channel();
		let limiters = limits
			.into_iter()
			.map(|(category, limit)| (category, Arc::new(RateLimiter::new(limit))))
			.collect();

		Self {
			shared: Arc::new(Shared {
				sender,
				receiver: AsyncMutex::new(receiver),
				limiters,
				workers: Default::default(),
				started: AtomicBool::new(false),
				pending: AtomicUsize::new(0),
				idle: Notify::new(),
				next_id: AtomicU64::new(1),
				metrics: Default::default(),
			}),
		}
	}

	/// Limiter gating the category, if it has one.
	pub fn limiter(&self, category: ProviderCategory) -> Option<&Arc<RateLimiter>> {
		self.shared.limiters.get(&category)
	}

	/// Shared job counters.
	pub fn metrics(&self) -> &DispatchMetrics {
		&self.shared.metrics
	}

	/// Jobs submitted but not yet acknowledged done.
	pub fn pending(&self) -> usize {
		self.shared.pending.load(Ordering::Acquire)
	}

	/// Returns `true` while a worker pool is running.
	pub fn is_started(&self) -> bool {
		self.shared.started.load(Ordering::Acquire)
	}

	/// Enqueues a fire-and-forget operation; never blocks and never fails.
	///
	/// Errors returned by the operation are logged by the worker and otherwise discarded.
	pub fn submit<F, E>(&self, category: ProviderCategory, operation: F) -> JobId
	where
		F: 'static + Send + Future<Output = Result<(), E>>,
		E: Into<BoxError>,
	{
		self.enqueue(category, Box::pin(async move { operation.await.map_err(Into::into) }))
	}

	/// Enqueues an operation and returns a handle that receives its outcome.
	///
	/// The worker still logs and counts a failure; the handle only adds a result channel.
	pub fn submit_with_result<F, T>(&self, category: ProviderCategory, operation: F) -> JobHandle<T>
	where
		F: 'static + Send + Future<Output = Result<T>>,
		T: 'static + Send,
	{
		let (tx, rx) = oneshot::channel();
		let id = self.enqueue(
			category,
			Box::pin(async move {
				let outcome = operation.await;
				let failure = outcome.as_ref().err().map(ToString::to_string);

				// The submitter may have dropped its handle.
				let _ = tx.send(outcome);

				match failure {
					Some(message) => Err(message.into()),
					None => Ok(()),
				}
			}),
		);

		JobHandle::new(id, rx)
	}

	/// Spawns `worker_count` workers (at least one) on the current tokio runtime.
	///
	/// Idempotent: only the first call spawns; later calls return `0` until a
	/// [`Dispatcher::shutdown`].
	pub fn start(&self, worker_count: usize) -> usize {
		if self.shared.started.swap(true, Ordering::AcqRel) {
			return 0;
		}

		let worker_count = worker_count.max(1);
		let mut workers = self.shared.workers.lock();

		for index in 1..=worker_count {
			workers.push(tokio::spawn(worker::run(self.shared.clone(), index)));
		}

		tracing::info!(worker_count, "Dispatcher started.");

		worker_count
	}

	/// Resolves once every submitted job has been acknowledged done.
	pub async fn wait_idle(&self) {
		loop {
			let mut notified = pin::pin!(self.shared.idle.notified());

			notified.as_mut().enable();

			if self.pending() == 0 {
				return;
			}

			notified.await;
		}
	}

	/// Aborts the worker pool and discards queued jobs; nothing is persisted.
	pub async fn shutdown(&self) {
		let workers = std::mem::take(&mut *self.shared.workers.lock());
		let worker_count = workers.len();

		for handle in &workers {
			handle.abort();
		}
		for handle in workers {
			// Cancellation is the expected outcome.
			let _ = handle.await;
		}

		let mut discarded = 0_usize;
		{
			let mut receiver = self.shared.receiver.lock().await;

			while receiver.try_recv().is_ok() {
				self.shared.metrics.record_dropped();
				self.shared.complete();

				discarded += 1;
			}
		}

		self.shared.started.store(false, Ordering::Release);

		tracing::info!(worker_count, discarded, "Dispatcher shut down.");
	}

	fn enqueue(&self, category: ProviderCategory, operation: job::JobFuture) -> JobId {
		let id = JobId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));

		self.shared.pending.fetch_add(1, Ordering::AcqRel);
		self.shared.metrics.record_submitted();

		if self.shared.sender.send(Job { id, category, operation }).is_err() {
			// The receiver lives in `Shared`, so this only happens while tearing down.
			self.shared.metrics.record_dropped();
			self.shared.complete();
		}

		tracing::debug!(job_id = id.0, category = category.as_str(), "Job submitted.");

		id
	}
}
impl Default for Dispatcher {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for Dispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Dispatcher")
			.field("started", &self.is_started())
			.field("pending", &self.pending())
			.field("limited_categories", &self.shared.limiters.keys().collect::<Vec<_>>())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn category_tags_parse_with_default_fallback() {
		assert_eq!(ProviderCategory::from_tag("openai"), ProviderCategory::TextGeneration);
		assert_eq!(ProviderCategory::from_tag(" TensorArt "), ProviderCategory::ImagePrimary);
		assert_eq!(ProviderCategory::from_tag("replicate"), ProviderCategory::ImageSecondary);
		assert_eq!(ProviderCategory::from_tag("image-secondary"), ProviderCategory::ImageSecondary);
		assert_eq!(
			"midjourney".parse::<ProviderCategory>(),
			Ok(ProviderCategory::Default)
		);
	}

	#[test]
	fn default_dispatcher_limits_known_categories_only() {
		let dispatcher = Dispatcher::new();

		assert_eq!(
			dispatcher.limiter(ProviderCategory::TextGeneration).map(|l| l.limit()),
			Some(RateLimit::TEXT_GENERATION)
		);
		assert!(dispatcher.limiter(ProviderCategory::ImagePrimary).is_some());
		assert!(dispatcher.limiter(ProviderCategory::ImageSecondary).is_some());
		assert!(dispatcher.limiter(ProviderCategory::Default).is_none());
		assert!(!dispatcher.is_started());
	}

	#[tokio::test]
	async fn wait_idle_returns_immediately_without_jobs() {
		Dispatcher::new().wait_idle().await;
	}
}

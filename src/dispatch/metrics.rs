// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for dispatched jobs.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
	submitted: AtomicU64,
	succeeded: AtomicU64,
	failed: AtomicU64,
	panicked: AtomicU64,
	dropped: AtomicU64,
}
impl DispatchMetrics {
	/// Jobs accepted by `submit`.
	pub fn submitted(&self) -> u64 {
		self.submitted.load(Ordering::Relaxed)
	}

	/// Jobs whose operation returned `Ok`.
	pub fn succeeded(&self) -> u64 {
		self.succeeded.load(Ordering::Relaxed)
	}

	/// Jobs whose operation returned an error.
	pub fn failed(&self) -> u64 {
		self.failed.load(Ordering::Relaxed)
	}

	/// Jobs whose operation panicked.
	pub fn panicked(&self) -> u64 {
		self.panicked.load(Ordering::Relaxed)
	}

	/// Jobs discarded by a shutdown before or while running.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	pub(crate) fn record_submitted(&self) {
		self.submitted.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_succeeded(&self) {
		self.succeeded.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failed(&self) {
		self.failed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_panicked(&self) {
		self.panicked.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_dropped(&self) {
		self.dropped.fetch_add(1, Ordering::Relaxed);
	}
}

//! Worker loop draining the shared queue.

// std
use std::{any::Any, panic::AssertUnwindSafe};
// crates.io
use futures_util::FutureExt;
// self
use crate::{
	_prelude::*,
	dispatch::{Job, Shared},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Acknowledges a job exactly once, even when the worker is aborted mid-job.
struct Completion<'a> {
	shared: &'a Shared,
	settled: bool,
}
impl Drop for Completion<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.shared.metrics.record_dropped();
		}

		self.shared.complete();
	}
}

pub(crate) async fn run(shared: Arc<Shared>, worker: usize) {
	tracing::debug!(worker, "Dispatcher worker started.");

	loop {
		let next = shared.receiver.lock().await.recv().await;
		let Some(job) = next else {
			break;
		};

		execute(&shared, job).await;
	}

	tracing::debug!(worker, "Dispatcher worker stopped.");
}

async fn execute(shared: &Shared, job: Job) {
	let Job { id, category, operation } = job;
	let mut completion = Completion { shared, settled: false };

	if let Some(limiter) = shared.limiters.get(&category) {
		let waited = limiter.acquire().await;

		if !waited.is_zero() {
			tracing::debug!(
				job_id = id.0,
				category = category.as_str(),
				waited_ms = waited.as_millis() as u64,
				"Job waited for a rate-limit permit.",
			);
		}
	}

	let span = FlowSpan::new(FlowKind::Job, category.as_str());

	obs::record_flow_outcome(FlowKind::Job, FlowOutcome::Attempt);

	match span.instrument(AssertUnwindSafe(operation).catch_unwind()).await {
		Ok(Ok(())) => {
			shared.metrics.record_succeeded();
			obs::record_flow_outcome(FlowKind::Job, FlowOutcome::Success);

			tracing::debug!(job_id = id.0, category = category.as_str(), "Job finished.");
		},
		Ok(Err(e)) => {
			shared.metrics.record_failed();
			obs::record_flow_outcome(FlowKind::Job, FlowOutcome::Failure);

			tracing::warn!(job_id = id.0, category = category.as_str(), error = %e, "Job failed.");
		},
		Err(panic) => {
			shared.metrics.record_panicked();
			obs::record_flow_outcome(FlowKind::Job, FlowOutcome::Failure);

			tracing::error!(
				job_id = id.0,
				category = category.as_str(),
				panic = panic_message(panic.as_ref()),
				"Job panicked.",
			);
		},
	}

	completion.settled = true;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
	payload
		.downcast_ref::<&str>()
		.copied()
		.or_else(|| payload.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("<non-string panic payload>")
}

// crates.io
use tokio::sync::oneshot;
// self
use crate::{_prelude::*, dispatch::ProviderCategory};

/// Boxed operation executed by a worker.
pub(crate) type JobFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// Identifier assigned to every submitted job, unique per dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);
impl Display for JobId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "job-{}", self.0)
	}
}

/// A unit of deferred work; consumed exactly once by one worker.
pub(crate) struct Job {
	pub(crate) id: JobId,
	pub(crate) category: ProviderCategory,
	pub(crate) operation: JobFuture,
}
impl Debug for Job {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Job").field("id", &self.id).field("category", &self.category).finish()
	}
}

/// Receiving end of [`Dispatcher::submit_with_result`](crate::dispatch::Dispatcher::submit_with_result).
#[derive(Debug)]
pub struct JobHandle<T> {
	id: JobId,
	receiver: oneshot::Receiver<Result<T>>,
}
impl<T> JobHandle<T> {
	pub(crate) fn new(id: JobId, receiver: oneshot::Receiver<Result<T>>) -> Self {
		Self { id, receiver }
	}

	/// Identifier of the underlying job.
	pub fn id(&self) -> JobId {
		self.id
	}

	/// Waits for the job's outcome.
	///
	/// Returns [`Error::JobLost`] when the job panicked or was dropped by a shutdown.
	pub async fn wait(self) -> Result<T> {
		self.receiver.await.map_err(|_| Error::JobLost { job_id: self.id.0 })?
	}
}

//! Thin clients for the external providers that dispatched jobs talk to.
//!
//! Each client owns its HTTP transport and per-request timeout; the dispatcher imposes none.

pub mod deviantart;
pub mod replicate;
pub mod tensorart;
pub mod text;
pub mod variant;

pub use deviantart::*;
pub use replicate::*;
pub use tensorart::*;
pub use text::*;
pub use variant::*;

// std
use std::time::Duration;

/// Per-request timeout applied by clients built without an explicit transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Polling cadence and overall deadline for asynchronous provider jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSchedule {
	/// Delay between status checks.
	pub interval: Duration,
	/// Overall budget before giving up.
	pub timeout: Duration,
}
impl PollSchedule {
	/// Creates a schedule.
	pub const fn new(interval: Duration, timeout: Duration) -> Self {
		Self { interval, timeout }
	}
}
impl Default for PollSchedule {
	fn default() -> Self {
		Self::new(Duration::from_secs(2), Duration::from_secs(180))
	}
}

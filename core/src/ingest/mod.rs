//! Following repository analyses from submission to a final outcome.

mod active_jobs;
mod poll_state;
mod poller;

use std::time::Duration;

pub use active_jobs::ActiveJobs;
pub use poll_state::PollState;
pub use poller::JobHandle;
pub use poller::JobPoller;
pub use poller::SubmitError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Spacing between status fetches; the first fetch happens one interval
    /// after the poll starts.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

use astra_protocol::CodebaseStatus;
use astra_protocol::IngestStatus;

pub(crate) const UNKNOWN_FAILURE_MESSAGE: &str = "An unknown error occurred during analysis";

/// Where a single status poll stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Running { attempts: u32 },
    Succeeded { file_count: Option<u64> },
    Failed { message: String },
    TimedOut { attempts: u32 },
    /// The poll was torn down, or superseded, before reaching a result.
    Cancelled,
}

impl PollState {
    pub fn start() -> Self {
        Self::Running { attempts: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running { .. })
    }

    /// Applies one tick. `fetch` is `None` when the status request failed;
    /// such ticks still count against `max_attempts`.
    ///
    /// A terminal status reported on the last allowed tick wins over the
    /// timeout. Terminal states are absorbing.
    pub fn on_tick(self, fetch: Option<&CodebaseStatus>, max_attempts: u32) -> Self {
        let Self::Running { attempts } = self else {
            return self;
        };
        let attempts = attempts.saturating_add(1);
        match fetch {
            Some(status) if status.status == IngestStatus::Completed => Self::Succeeded {
                file_count: status.file_count,
            },
            Some(status) if status.status == IngestStatus::Failed => Self::Failed {
                message: status
                    .error_message
                    .clone()
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_FAILURE_MESSAGE.to_string()),
            },
            _ if attempts >= max_attempts => Self::TimedOut { attempts },
            _ => Self::Running { attempts },
        }
    }
}

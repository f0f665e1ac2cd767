use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use astra_protocol::CodebaseId;
use astra_protocol::JobKey;

#[derive(Debug, Clone)]
struct ActiveJob {
    generation: u64,
    codebase_id: Option<CodebaseId>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobKey, ActiveJob>,
    next_generation: u64,
}

/// Analyses in flight, keyed by repository.
///
/// Each entry carries a generation so a poller that has been superseded or
/// torn down can tell that its results no longer apply.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<Inner>>,
}

pub(crate) enum Reservation {
    New(u64),
    Existing(u64),
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `key` unless it is already active.
    pub(crate) fn reserve(&self, key: &JobKey) -> Reservation {
        let mut inner = self.lock();
        if let Some(job) = inner.jobs.get(key) {
            return Reservation::Existing(job.generation);
        }
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.jobs.insert(
            key.clone(),
            ActiveJob {
                generation,
                codebase_id: None,
            },
        );
        Reservation::New(generation)
    }

    /// Starts tracking `key` under a fresh generation, superseding whatever
    /// was tracked before.
    pub(crate) fn track(&self, key: &JobKey, codebase_id: CodebaseId) -> u64 {
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.jobs.insert(
            key.clone(),
            ActiveJob {
                generation,
                codebase_id: Some(codebase_id),
            },
        );
        generation
    }

    pub(crate) fn attach(&self, key: &JobKey, generation: u64, codebase_id: CodebaseId) -> bool {
        let mut inner = self.lock();
        match inner.jobs.get_mut(key) {
            Some(job) if job.generation == generation => {
                job.codebase_id = Some(codebase_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn release(&self, key: &JobKey, generation: u64) -> bool {
        self.complete_with(key, generation, || ()).is_some()
    }

    pub(crate) fn is_current(&self, key: &JobKey, generation: u64) -> bool {
        self.lock()
            .jobs
            .get(key)
            .is_some_and(|job| job.generation == generation)
    }

    /// Removes the entry and runs `f` while still holding the lock, so no
    /// observer sees the job gone without its outcome having been reported.
    /// Returns `None`, without running `f`, when `generation` is stale.
    pub(crate) fn complete_with<R>(
        &self,
        key: &JobKey,
        generation: u64,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        let mut inner = self.lock();
        if !inner
            .jobs
            .get(key)
            .is_some_and(|job| job.generation == generation)
        {
            return None;
        }
        inner.jobs.remove(key);
        Some(f())
    }

    pub(crate) fn generation(&self, key: &JobKey) -> Option<u64> {
        self.lock().jobs.get(key).map(|job| job.generation)
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.lock().jobs.contains_key(key)
    }

    /// `None` while the submission has not been acknowledged yet.
    pub fn codebase_id(&self, key: &JobKey) -> Option<CodebaseId> {
        self.lock()
            .jobs
            .get(key)
            .and_then(|job| job.codebase_id.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted by key.
    pub fn snapshot(&self) -> Vec<(JobKey, Option<CodebaseId>)> {
        let mut jobs: Vec<_> = self
            .lock()
            .jobs
            .iter()
            .map(|(key, job)| (key.clone(), job.codebase_id.clone()))
            .collect();
        jobs.sort_by_cached_key(|(key, _)| key.to_string());
        jobs
    }
}

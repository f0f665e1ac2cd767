use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use astra_backend_client::ApiError;
use astra_protocol::CodebaseId;
use astra_protocol::JobKey;
use astra_protocol::NotificationAction;
use astra_protocol::NotificationKind;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::ActiveJobs;
use super::PollSettings;
use super::PollState;
use super::active_jobs::Reservation;
use crate::backend::IngestBackend;
use crate::notifications::NotificationBus;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to start analysis of {key}: {source}")]
    Backend {
        key: JobKey,
        #[source]
        source: ApiError,
    },
    /// Another submission for the same repository has not been acknowledged
    /// by the backend yet.
    #[error("analysis of {0} is already being submitted")]
    InFlight(JobKey),
}

/// A running (or finished) status poll.
#[derive(Debug, Clone)]
pub struct JobHandle {
    key: JobKey,
    codebase_id: CodebaseId,
    state: watch::Receiver<PollState>,
}

impl JobHandle {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn codebase_id(&self) -> &CodebaseId {
        &self.codebase_id
    }

    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    /// Resolves once the poll reaches a terminal state.
    pub async fn wait(mut self) -> PollState {
        loop {
            let current = self.state.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.state.changed().await.is_err() {
                // The poll task is gone without publishing a result.
                let last = self.state.borrow().clone();
                return if last.is_terminal() {
                    last
                } else {
                    PollState::Cancelled
                };
            }
        }
    }
}

type Handles = Arc<Mutex<HashMap<JobKey, (u64, JobHandle)>>>;

/// Submits analyses and polls their status until the backend reports a
/// result.
///
/// Poll loops run as tasks on the current tokio runtime and live as long as
/// the poller: dropping it cancels every loop.
pub struct JobPoller {
    backend: Arc<dyn IngestBackend>,
    notifications: NotificationBus,
    settings: PollSettings,
    active: ActiveJobs,
    handles: Handles,
    cancel: CancellationToken,
}

impl std::fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPoller")
            .field("settings", &self.settings)
            .field("active", &self.active.snapshot())
            .finish_non_exhaustive()
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl JobPoller {
    pub fn new(
        backend: Arc<dyn IngestBackend>,
        notifications: NotificationBus,
        settings: PollSettings,
    ) -> Self {
        Self {
            backend,
            notifications,
            settings,
            active: ActiveJobs::new(),
            handles: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Starts an analysis of `key` and polls it.
    ///
    /// A key that is already active is not submitted again: the existing
    /// handle is returned, or [`SubmitError::InFlight`] while the earlier
    /// submission is still waiting on the backend.
    pub async fn submit_job(&self, key: JobKey) -> Result<JobHandle, SubmitError> {
        let mut generation = match self.active.reserve(&key) {
            Reservation::Existing(generation) => {
                info!(job = %key, "analysis already in flight");
                return self
                    .handle_for(&key, generation)
                    .ok_or(SubmitError::InFlight(key));
            }
            Reservation::New(generation) => generation,
        };

        let reservation = ReservationGuard {
            active: &self.active,
            key: &key,
            generation,
            armed: true,
        };
        let result = self.backend.ingest_repository(&key).await;
        match result {
            Err(source) => {
                drop(reservation);
                warn!(job = %key, "failed to submit analysis: {source}");
                self.notifications.error(
                    format!("Failed to analyze {}", key.repo),
                    source.to_string(),
                );
                Err(SubmitError::Backend { key, source })
            }
            Ok(codebase_id) => {
                reservation.disarm();
                if !self.active.attach(&key, generation, codebase_id.clone()) {
                    // A poll_status for the same key replaced the reservation
                    // while the backend was answering.
                    if let Some(handle) = self.current_handle(&key) {
                        info!(job = %key, codebase_id = %codebase_id, "analysis already being polled");
                        return Ok(handle);
                    }
                    generation = self.active.track(&key, codebase_id.clone());
                }
                info!(job = %key, codebase_id = %codebase_id, "analysis submitted");
                self.notifications.success(
                    format!("Started analyzing {}", key.repo),
                    format!("{key} has been queued for analysis."),
                );
                let display_name = key.repo.clone();
                Ok(self.spawn_poll(codebase_id, display_name, key, generation))
            }
        }
    }

    /// Polls an already-submitted analysis. Any earlier poll for the same
    /// key is superseded and ends as [`PollState::Cancelled`].
    pub fn poll_status(
        &self,
        codebase_id: CodebaseId,
        display_name: impl Into<String>,
        job_key: JobKey,
    ) -> JobHandle {
        let generation = self.active.track(&job_key, codebase_id.clone());
        self.spawn_poll(codebase_id, display_name.into(), job_key, generation)
    }

    fn current_handle(&self, key: &JobKey) -> Option<JobHandle> {
        let generation = self.active.generation(key)?;
        self.handle_for(key, generation)
    }

    fn handle_for(&self, key: &JobKey, generation: u64) -> Option<JobHandle> {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles
            .get(key)
            .filter(|(g, _)| *g == generation)
            .map(|(_, handle)| handle.clone())
    }

    fn spawn_poll(
        &self,
        codebase_id: CodebaseId,
        display_name: String,
        key: JobKey,
        generation: u64,
    ) -> JobHandle {
        let (tx, rx) = watch::channel(PollState::start());
        let handle = JobHandle {
            key: key.clone(),
            codebase_id: codebase_id.clone(),
            state: rx,
        };
        {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            let superseded = handles.get(&key).is_some_and(|(g, _)| *g > generation);
            if !superseded {
                handles.insert(key.clone(), (generation, handle.clone()));
            }
        }

        let poll = Poll {
            backend: Arc::clone(&self.backend),
            notifications: self.notifications.clone(),
            active: self.active.clone(),
            handles: Arc::clone(&self.handles),
            settings: self.settings,
            cancel: self.cancel.child_token(),
            key,
            codebase_id,
            display_name,
            generation,
        };
        tokio::spawn(poll.run(tx));
        handle
    }
}

/// Gives the key back if the submission future is dropped or fails.
struct ReservationGuard<'a> {
    active: &'a ActiveJobs,
    key: &'a JobKey,
    generation: u64,
    armed: bool,
}

impl ReservationGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.active.release(self.key, self.generation);
        }
    }
}

struct Poll {
    backend: Arc<dyn IngestBackend>,
    notifications: NotificationBus,
    active: ActiveJobs,
    handles: Handles,
    settings: PollSettings,
    cancel: CancellationToken,
    key: JobKey,
    codebase_id: CodebaseId,
    display_name: String,
    generation: u64,
}

impl Poll {
    async fn run(self, tx: watch::Sender<PollState>) {
        let final_state = self.drive(&tx).await;
        match &final_state {
            PollState::Cancelled => info!(job = %self.key, "status poll cancelled"),
            state => info!(job = %self.key, ?state, "status poll finished"),
        }
        self.forget_handle();
        tx.send_replace(final_state);
    }

    async fn drive(&self, tx: &watch::Sender<PollState>) -> PollState {
        let interval = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = PollState::start();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return self.abandon(),
                _ = ticker.tick() => {}
            }

            let fetched = self.backend.codebase_status(&self.codebase_id).await;
            if self.cancel.is_cancelled() || !self.active.is_current(&self.key, self.generation) {
                return self.abandon();
            }

            let status = match fetched {
                Ok(status) => Some(status),
                Err(err) => {
                    warn!(
                        job = %self.key,
                        transient = err.is_transient(),
                        "status fetch failed: {err}"
                    );
                    None
                }
            };
            let next = state.on_tick(status.as_ref(), self.settings.max_attempts);
            if next.is_terminal() {
                return self
                    .active
                    .complete_with(&self.key, self.generation, || self.notify(&next))
                    .map_or(PollState::Cancelled, |()| next);
            }
            state = next;
            tx.send_replace(state.clone());
        }
    }

    fn forget_handle(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles
            .get(&self.key)
            .is_some_and(|(g, _)| *g == self.generation)
        {
            handles.remove(&self.key);
        }
    }

    /// Drops this poll's claim on the job without reporting anything.
    fn abandon(&self) -> PollState {
        self.active.release(&self.key, self.generation);
        PollState::Cancelled
    }

    fn notify(&self, state: &PollState) {
        let name = &self.display_name;
        match state {
            PollState::Succeeded { file_count } => {
                self.notifications.push(
                    NotificationKind::Success,
                    format!("Analysis of {name} complete"),
                    Some(format!("Processed {} files.", file_count.unwrap_or(0))),
                    Some(NotificationAction {
                        label: "View results".to_string(),
                        target: format!("/codebases/{}", self.codebase_id),
                    }),
                );
            }
            PollState::Failed { message } => {
                self.notifications
                    .error(format!("Analysis of {name} failed"), message.clone());
            }
            PollState::TimedOut { attempts } => {
                self.notifications.warning(
                    format!("Analysis of {name} is taking longer than expected"),
                    format!(
                        "Stopped checking after {attempts} attempts. Check the codebase status manually."
                    ),
                );
            }
            PollState::Running { .. } | PollState::Cancelled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use astra_client::TransportError;
    use astra_protocol::CodebaseStatus;
    use astra_protocol::IngestStatus;
    use astra_protocol::Notification;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;
    use tokio::sync::broadcast;

    fn network_error() -> ApiError {
        ApiError::Transport(TransportError::Network("connection reset".to_string()))
    }

    fn status(status: IngestStatus) -> Result<CodebaseStatus, ApiError> {
        Ok(CodebaseStatus::new(status))
    }

    fn completed(file_count: u64) -> Result<CodebaseStatus, ApiError> {
        let mut status = CodebaseStatus::new(IngestStatus::Completed);
        status.file_count = Some(file_count);
        Ok(status)
    }

    /// Reports PROCESSING once the script runs out.
    #[derive(Default)]
    struct ScriptedBackend {
        submit_error: Mutex<Option<ApiError>>,
        submit_gate: Option<Arc<Notify>>,
        /// Holds the next status fetch until notified.
        status_gate: Mutex<Option<Arc<Notify>>>,
        statuses: Mutex<VecDeque<Result<CodebaseStatus, ApiError>>>,
        ingests: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with_statuses(
            statuses: impl IntoIterator<Item = Result<CodebaseStatus, ApiError>>,
        ) -> Self {
            Self {
                statuses: Mutex::new(statuses.into_iter().collect()),
                ..Default::default()
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IngestBackend for ScriptedBackend {
        async fn ingest_repository(&self, _key: &JobKey) -> Result<CodebaseId, ApiError> {
            self.ingests.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.submit_gate {
                gate.notified().await;
            }
            match self.submit_error.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(CodebaseId::from(42)),
            }
        }

        async fn codebase_status(&self, _id: &CodebaseId) -> Result<CodebaseStatus, ApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let gate = self.status_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| status(IngestStatus::Processing))
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn of_kind(notifications: &[Notification], kind: NotificationKind) -> Vec<&Notification> {
        notifications.iter().filter(|n| n.kind == kind).collect()
    }

    fn widgets() -> JobKey {
        JobKey::new("acme", "widgets")
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn completes_on_third_tick_with_one_notification() {
        let backend = Arc::new(ScriptedBackend::with_statuses([
            status(IngestStatus::Pending),
            status(IngestStatus::Processing),
            completed(42),
        ]));
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend.clone(), bus, PollSettings::default());

        let start = Instant::now();
        let handle = poller.submit_job(widgets()).await.unwrap();
        assert!(poller.active_jobs().contains(&widgets()));
        assert_eq!(handle.codebase_id(), &CodebaseId::from(42));

        let outcome = handle.wait().await;

        assert_eq!(
            outcome,
            PollState::Succeeded {
                file_count: Some(42)
            }
        );
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(backend.fetches(), 3);
        assert!(poller.active_jobs().is_empty());

        let notifications = drain(&mut rx);
        let mentions_42: Vec<_> = notifications
            .iter()
            .filter(|n| n.description.as_deref().is_some_and(|d| d.contains("42")))
            .collect();
        assert_eq!(mentions_42.len(), 1);
        assert_eq!(mentions_42[0].kind, NotificationKind::Success);
        assert_eq!(
            mentions_42[0].action,
            Some(NotificationAction {
                label: "View results".to_string(),
                target: "/codebases/42".to_string(),
            })
        );
        assert_eq!(notifications[0].title, "Started analyzing widgets");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.fetches(), 3);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn times_out_after_sixty_ticks() {
        let backend = Arc::new(ScriptedBackend::default());
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend.clone(), bus, PollSettings::default());

        let start = Instant::now();
        let outcome = poller
            .poll_status(CodebaseId::from(7), "widgets", widgets())
            .wait()
            .await;

        assert_eq!(outcome, PollState::TimedOut { attempts: 60 });
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        assert_eq!(backend.fetches(), 60);
        assert!(poller.active_jobs().is_empty());

        let notifications = drain(&mut rx);
        assert_eq!(of_kind(&notifications, NotificationKind::Warning).len(), 1);
        assert!(of_kind(&notifications, NotificationKind::Success).is_empty());
        assert!(of_kind(&notifications, NotificationKind::Error).is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn transient_errors_do_not_stop_polling() {
        let backend = Arc::new(ScriptedBackend::with_statuses([
            Err(network_error()),
            Err(network_error()),
            completed(3),
        ]));
        let poller = JobPoller::new(backend.clone(), NotificationBus::new(), PollSettings::default());

        let outcome = poller
            .poll_status(CodebaseId::from(7), "widgets", widgets())
            .wait()
            .await;

        assert_eq!(outcome, PollState::Succeeded { file_count: Some(3) });
        assert_eq!(backend.fetches(), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn persistent_fetch_failure_still_times_out() {
        let backend = Arc::new(ScriptedBackend::with_statuses(
            (0..5).map(|_| Err(network_error())),
        ));
        let settings = PollSettings {
            interval: Duration::from_secs(1),
            max_attempts: 5,
        };
        let poller = JobPoller::new(backend.clone(), NotificationBus::new(), settings);

        let outcome = poller
            .poll_status(CodebaseId::from(7), "widgets", widgets())
            .wait()
            .await;

        assert_eq!(outcome, PollState::TimedOut { attempts: 5 });
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_status_reports_backend_message() {
        let mut failed = CodebaseStatus::new(IngestStatus::Failed);
        failed.error_message = Some("repository not found".to_string());
        let backend = Arc::new(ScriptedBackend::with_statuses([Ok(failed)]));
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend, bus, PollSettings::default());

        let outcome = poller
            .poll_status(CodebaseId::from(7), "widgets", widgets())
            .wait()
            .await;

        assert_eq!(
            outcome,
            PollState::Failed {
                message: "repository not found".to_string()
            }
        );
        let notifications = drain(&mut rx);
        let errors = of_kind(&notifications, NotificationKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].description.as_deref(), Some("repository not found"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn duplicate_submit_returns_existing_handle() {
        let backend = Arc::new(ScriptedBackend::default());
        let poller = JobPoller::new(backend.clone(), NotificationBus::new(), PollSettings::default());

        let first = poller.submit_job(widgets()).await.unwrap();
        let second = poller.submit_job(widgets()).await.unwrap();

        assert_eq!(first.codebase_id(), second.codebase_id());
        assert_eq!(backend.ingests.load(Ordering::SeqCst), 1);
        assert_eq!(poller.active_jobs().len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn submit_while_first_is_unacknowledged_is_in_flight() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend {
            submit_gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let poller = Arc::new(JobPoller::new(
            backend.clone(),
            NotificationBus::new(),
            PollSettings::default(),
        ));

        let first = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.submit_job(widgets()).await.map(|h| h.codebase_id().clone()) }
        });
        tokio::task::yield_now().await;
        assert!(poller.active_jobs().contains(&widgets()));
        assert_eq!(poller.active_jobs().codebase_id(&widgets()), None);

        let err = poller.submit_job(widgets()).await.unwrap_err();
        assert!(matches!(err, SubmitError::InFlight(ref key) if key == &widgets()));

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), CodebaseId::from(42));
        assert_eq!(backend.ingests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn submit_failure_notifies_and_leaves_no_active_job() {
        let backend = Arc::new(ScriptedBackend {
            submit_error: Mutex::new(Some(network_error())),
            ..Default::default()
        });
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend.clone(), bus, PollSettings::default());

        let err = poller.submit_job(widgets()).await.unwrap_err();

        assert!(matches!(err, SubmitError::Backend { .. }));
        assert!(poller.active_jobs().is_empty());
        let notifications = drain(&mut rx);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Error);
        assert_eq!(notifications[0].title, "Failed to analyze widgets");
        assert_eq!(backend.fetches(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn dropping_the_poller_cancels_polls_silently() {
        let backend = Arc::new(ScriptedBackend::default());
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend.clone(), bus, PollSettings::default());

        let handle = poller.poll_status(CodebaseId::from(7), "widgets", widgets());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(backend.fetches(), 2);
        let active = poller.active_jobs().clone();

        drop(poller);
        assert_eq!(handle.wait().await, PollState::Cancelled);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.fetches(), 2);
        assert!(active.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn repolling_a_key_supersedes_the_old_poll() {
        let backend = Arc::new(ScriptedBackend::default());
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend.clone(), bus, PollSettings::default());

        let old = poller.poll_status(CodebaseId::from(7), "widgets", widgets());
        tokio::time::sleep(Duration::from_secs(6)).await;
        let new = poller.poll_status(CodebaseId::from(8), "widgets", widgets());

        assert_eq!(old.wait().await, PollState::Cancelled);
        assert_eq!(new.state(), PollState::Running { attempts: 0 });
        assert_eq!(
            poller.active_jobs().codebase_id(&widgets()),
            Some(CodebaseId::from(8))
        );
        let tracked = poller.current_handle(&widgets()).unwrap();
        assert_eq!(tracked.codebase_id(), &CodebaseId::from(8));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn poll_status_during_submit_keeps_the_live_poll() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend {
            submit_gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = Arc::new(JobPoller::new(backend.clone(), bus, PollSettings::default()));

        let first = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.submit_job(widgets()).await.map(|h| h.codebase_id().clone()) }
        });
        tokio::task::yield_now().await;
        let tracked = poller.poll_status(CodebaseId::from(7), "widgets", widgets());
        gate.notify_one();

        assert_eq!(first.await.unwrap().unwrap(), CodebaseId::from(7));
        assert_eq!(tracked.state(), PollState::Running { attempts: 0 });
        assert_eq!(
            poller.active_jobs().codebase_id(&widgets()),
            Some(CodebaseId::from(7))
        );

        let again = poller.submit_job(widgets()).await.unwrap();
        assert_eq!(again.codebase_id(), &CodebaseId::from(7));
        assert_eq!(backend.ingests.load(Ordering::SeqCst), 1);
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(backend.fetches(), 1);
        assert_eq!(tracked.state(), PollState::Running { attempts: 1 });
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn finished_polls_release_their_handles() {
        let backend = Arc::new(ScriptedBackend::with_statuses([
            completed(1),
            completed(2),
            completed(3),
        ]));
        let poller = JobPoller::new(backend.clone(), NotificationBus::new(), PollSettings::default());

        let mut handles = Vec::new();
        for repo in ["widgets", "gadgets", "gizmos"] {
            handles.push(poller.submit_job(JobKey::new("acme", repo)).await.unwrap());
        }
        assert_eq!(poller.handles.lock().unwrap().len(), 3);

        for handle in handles {
            assert!(matches!(handle.wait().await, PollState::Succeeded { .. }));
        }
        assert!(poller.active_jobs().is_empty());
        assert!(poller.handles.lock().unwrap().is_empty());

        let again = poller.submit_job(widgets()).await.unwrap();
        assert_eq!(backend.ingests.load(Ordering::SeqCst), 4);
        assert_eq!(again.state(), PollState::Running { attempts: 0 });
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fetch_resolving_after_drop_is_discarded() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend {
            status_gate: Mutex::new(Some(Arc::clone(&gate))),
            ..ScriptedBackend::with_statuses([completed(3)])
        });
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend.clone(), bus, PollSettings::default());

        let handle = poller.poll_status(CodebaseId::from(7), "widgets", widgets());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(backend.fetches(), 1);
        let active = poller.active_jobs().clone();

        drop(poller);
        gate.notify_one();

        assert_eq!(handle.wait().await, PollState::Cancelled);
        assert!(active.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fetch_resolving_after_repoll_is_discarded() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend {
            status_gate: Mutex::new(Some(Arc::clone(&gate))),
            ..ScriptedBackend::with_statuses([completed(3)])
        });
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let poller = JobPoller::new(backend.clone(), bus, PollSettings::default());

        let old = poller.poll_status(CodebaseId::from(7), "widgets", widgets());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(backend.fetches(), 1);
        let new = poller.poll_status(CodebaseId::from(8), "widgets", widgets());
        gate.notify_one();

        assert_eq!(old.wait().await, PollState::Cancelled);
        assert_eq!(new.state(), PollState::Running { attempts: 0 });
        assert_eq!(
            poller.active_jobs().codebase_id(&widgets()),
            Some(CodebaseId::from(8))
        );
        assert!(drain(&mut rx).is_empty());
    }
}

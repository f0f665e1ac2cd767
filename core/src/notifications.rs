use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use astra_protocol::Notification;
use astra_protocol::NotificationAction;
use astra_protocol::NotificationKind;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How long a notification stays in [`NotificationBus::active`].
pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_secs(3);

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out of user-facing notifications.
///
/// Cloning is cheap; all clones share ids, subscribers and the visible list.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Notification>,
    next_id: AtomicU64,
    visible: Mutex<Vec<(Instant, Notification)>>,
    dismiss_after: Duration,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.inner.tx.receiver_count())
            .field("dismiss_after", &self.inner.dismiss_after)
            .finish()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_dismiss_after(DEFAULT_DISMISS_AFTER)
    }

    pub fn with_dismiss_after(dismiss_after: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tx,
                next_id: AtomicU64::new(1),
                visible: Mutex::new(Vec::new()),
                dismiss_after,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.tx.subscribe()
    }

    pub fn push(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        description: Option<String>,
        action: Option<NotificationAction>,
    ) -> Notification {
        let notification = Notification {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            title: title.into(),
            description,
            action,
        };
        tracing::debug!(
            id = notification.id,
            kind = %notification.kind,
            title = %notification.title,
            "notification"
        );
        let now = Instant::now();
        let mut visible = self.visible();
        self.prune(&mut visible, now);
        visible.push((now, notification.clone()));
        drop(visible);
        // No receivers is fine; the visible list still has it.
        let _ = self.inner.tx.send(notification.clone());
        notification
    }

    pub fn success(&self, title: impl Into<String>, description: impl Into<String>) -> Notification {
        self.push(
            NotificationKind::Success,
            title,
            Some(description.into()),
            None,
        )
    }

    pub fn error(&self, title: impl Into<String>, description: impl Into<String>) -> Notification {
        self.push(NotificationKind::Error, title, Some(description.into()), None)
    }

    pub fn warning(&self, title: impl Into<String>, description: impl Into<String>) -> Notification {
        self.push(
            NotificationKind::Warning,
            title,
            Some(description.into()),
            None,
        )
    }

    pub fn info(&self, title: impl Into<String>, description: impl Into<String>) -> Notification {
        self.push(NotificationKind::Info, title, Some(description.into()), None)
    }

    /// Notifications pushed within the dismiss window, oldest first.
    pub fn active(&self) -> Vec<Notification> {
        let mut visible = self.visible();
        self.prune(&mut visible, Instant::now());
        visible.iter().map(|(_, n)| n.clone()).collect()
    }

    /// Returns whether a visible notification with `id` was removed.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut visible = self.visible();
        let before = visible.len();
        visible.retain(|(_, n)| n.id != id);
        visible.len() != before
    }

    fn prune(&self, visible: &mut Vec<(Instant, Notification)>, now: Instant) {
        visible.retain(|(at, _)| now.duration_since(*at) < self.inner.dismiss_after);
    }

    fn visible(&self) -> std::sync::MutexGuard<'_, Vec<(Instant, Notification)>> {
        self.inner
            .visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

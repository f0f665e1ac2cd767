use astra_protocol::Notification;
use astra_protocol::NotificationKind;
use astra_protocol::SessionState;
use astra_protocol::ingest::CodebaseDetail;
use astra_protocol::ingest::CodebaseSummary;
use astra_protocol::ingest::Repository;
use owo_colors::OwoColorize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::error::TryRecvError;

pub fn format_notification(notification: &Notification, color: bool) -> String {
    let marker = match notification.kind {
        NotificationKind::Success => "✔",
        NotificationKind::Error => "✘",
        NotificationKind::Warning => "!",
        NotificationKind::Info | NotificationKind::Loading => "•",
    };
    let marker = if color {
        match notification.kind {
            NotificationKind::Success => marker.green().to_string(),
            NotificationKind::Error => marker.red().to_string(),
            NotificationKind::Warning => marker.yellow().to_string(),
            NotificationKind::Info | NotificationKind::Loading => marker.cyan().to_string(),
        }
    } else {
        marker.to_string()
    };

    let mut line = format!("{marker} {}", notification.title);
    if let Some(description) = notification
        .description
        .as_deref()
        .filter(|d| !d.is_empty())
    {
        line.push_str(&format!(": {description}"));
    }
    if let Some(action) = &notification.action {
        line.push_str(&format!(" [{} → {}]", action.label, action.target));
    }
    line
}

pub fn format_session(state: &SessionState) -> String {
    match (&state.user, state.authenticated) {
        (Some(user), true) => format!("Signed in as {}", user.display_name()),
        (None, true) => "Signed in".to_string(),
        (_, false) => "Not signed in. Run `astra login` to sign in.".to_string(),
    }
}

pub fn format_codebase(codebase: &CodebaseSummary) -> String {
    let status = codebase
        .status
        .map(|status| status.to_string())
        .unwrap_or_else(|| "-".to_string());
    let files = codebase.file_count.unwrap_or(0);
    let mut line = format!("{:>6}  {}  {status}  {files} files", codebase.id, codebase.name);
    if let Some(language) = &codebase.primary_language {
        line.push_str(&format!("  ({language})"));
    }
    line
}

pub fn format_codebase_detail(detail: &CodebaseDetail) -> String {
    let summary = &detail.summary;
    let mut lines = vec![format!("{} ({})", summary.name, summary.id)];
    let mut field = |label: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            lines.push(format!("  {label:<10}{value}"));
        }
    };
    field("status", summary.status.map(|s| s.to_string()));
    field("language", summary.primary_language.clone());
    field("files", summary.file_count.map(|n| n.to_string()));
    field("classes", detail.class_count.map(|n| n.to_string()));
    field("functions", detail.function_count.map(|n| n.to_string()));
    field("github", summary.github_url.clone());
    field("uploaded", detail.uploaded_at.clone());
    field("error", detail.error_message.clone());
    lines.join("\n")
}

pub fn format_repository(repo: &Repository) -> String {
    let name = match repo.job_key() {
        Some(key) => key.to_string(),
        None => repo.name.clone(),
    };
    let mut line = name;
    if repo.is_private == Some(true) {
        line.push_str("  [private]");
    }
    if let Some(description) = repo.description.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(&format!("  {description}"));
    }
    line
}

/// Prints notifications from the bus to stdout.
pub struct NotificationPrinter {
    rx: broadcast::Receiver<Notification>,
    color: bool,
}

impl NotificationPrinter {
    pub fn new(rx: broadcast::Receiver<Notification>, color: bool) -> Self {
        Self { rx, color }
    }

    /// Waits for the next notification and prints it. Returns `false` once
    /// the bus is gone.
    pub async fn print_next(&mut self) -> bool {
        loop {
            match self.rx.recv().await {
                Ok(notification) => {
                    println!("{}", format_notification(&notification, self.color));
                    return true;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("skipped {skipped} notifications");
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Prints whatever is already queued.
    pub fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(notification) => {
                    println!("{}", format_notification(&notification, self.color));
                }
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return,
            }
        }
    }
}

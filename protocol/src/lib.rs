//! Types shared between the backend client, the session layer and the
//! ingestion poller.

pub mod auth;
mod codebase_id;
pub mod ingest;
pub mod notification;
pub mod session;

pub use codebase_id::CodebaseId;
pub use ingest::CodebaseStatus;
pub use ingest::IngestStatus;
pub use ingest::JobKey;
pub use notification::Notification;
pub use notification::NotificationAction;
pub use notification::NotificationKind;
pub use session::Identity;
pub use session::SessionState;

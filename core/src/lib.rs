//! Client-side session and ingestion logic for the astramind backend.
//!
//! Two cooperating pieces live here: the [`auth::SessionManager`], which
//! decides whether the user is signed in, and the [`ingest::JobPoller`],
//! which follows repository analyses until the backend reports a result.
//! Both report user-facing outcomes through a [`NotificationBus`].

pub mod auth;
pub mod backend;
pub mod config;
pub mod ingest;
mod notifications;
pub mod token_data;

pub use auth::SessionManager;
pub use backend::AuthBackend;
pub use backend::IngestBackend;
pub use config::Config;
pub use config::ConfigOverrides;
pub use ingest::JobHandle;
pub use ingest::JobPoller;
pub use notifications::DEFAULT_DISMISS_AFTER;
pub use notifications::NotificationBus;

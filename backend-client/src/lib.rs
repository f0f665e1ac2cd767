mod auth;
mod client;
mod error;

pub use auth::AuthProvider;
pub use auth::StaticToken;
pub use client::BackendClient;
pub use client::normalize_base_url;
pub use error::ApiError;

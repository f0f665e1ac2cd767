//! The slices of the backend API the session and ingestion layers depend on.
//!
//! [`BackendClient`] implements both; tests substitute scripted fakes.

use astra_backend_client::ApiError;
use astra_backend_client::BackendClient;
use astra_protocol::CodebaseId;
use astra_protocol::CodebaseStatus;
use astra_protocol::Identity;
use astra_protocol::JobKey;
use async_trait::async_trait;

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// URL of the external login page.
    async fn auth_url(&self) -> Result<String, ApiError>;

    /// Server-side verdict for sessions not backed by a local token.
    async fn auth_status(&self) -> Result<bool, ApiError>;

    async fn current_user(&self) -> Result<Identity, ApiError>;

    async fn logout(&self) -> Result<(), ApiError>;
}

#[async_trait]
pub trait IngestBackend: Send + Sync {
    async fn ingest_repository(&self, key: &JobKey) -> Result<CodebaseId, ApiError>;

    async fn codebase_status(&self, id: &CodebaseId) -> Result<CodebaseStatus, ApiError>;
}

#[async_trait]
impl AuthBackend for BackendClient {
    async fn auth_url(&self) -> Result<String, ApiError> {
        self.github_auth_url().await
    }

    async fn auth_status(&self) -> Result<bool, ApiError> {
        BackendClient::auth_status(self).await
    }

    async fn current_user(&self) -> Result<Identity, ApiError> {
        BackendClient::current_user(self).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        BackendClient::logout(self).await
    }
}

#[async_trait]
impl IngestBackend for BackendClient {
    async fn ingest_repository(&self, key: &JobKey) -> Result<CodebaseId, ApiError> {
        BackendClient::ingest_repository(self, &key.owner, &key.repo).await
    }

    async fn codebase_status(&self, id: &CodebaseId) -> Result<CodebaseStatus, ApiError> {
        BackendClient::codebase_status(self, id).await
    }
}

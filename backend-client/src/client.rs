use std::sync::Arc;
use std::time::Duration;

use astra_client::HttpTransport;
use astra_client::ReqwestTransport;
use astra_client::Request;
use astra_client::Response;
use astra_client::TransportError;
use astra_protocol::CodebaseId;
use astra_protocol::CodebaseStatus;
use astra_protocol::Identity;
use astra_protocol::auth::AuthStatusResponse;
use astra_protocol::auth::AuthUrlResponse;
use astra_protocol::auth::TokenValidation;
use astra_protocol::auth::ValidateTokenRequest;
use astra_protocol::ingest::CodebaseDetail;
use astra_protocol::ingest::CodebaseSummary;
use astra_protocol::ingest::IngestRequest;
use astra_protocol::ingest::IngestResponse;
use astra_protocol::ingest::Repository;
use http::HeaderValue;
use http::header::ACCEPT;
use serde::de::DeserializeOwned;
use url::Url;

use crate::ApiError;
use crate::AuthProvider;
use crate::auth::add_auth_headers;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Trims trailing slashes and makes sure the URL points at the `/api`
/// prefix every backend route lives under.
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api")
    }
}

/// Typed access to the code-intelligence backend.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    auth: Option<Arc<dyn AuthProvider>>,
    timeout: Duration,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .field("has_auth", &self.auth.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BackendClient {
    pub fn new(base_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            transport,
            auth: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Client backed by a fresh reqwest connection pool.
    pub fn with_default_transport(base_url: &str) -> Self {
        Self::new(base_url, Arc::new(ReqwestTransport::default()))
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Appends each segment percent-encoded, so ids can never change the
    /// shape of the path.
    fn url_with_segments(&self, segments: &[&str]) -> Result<String, ApiError> {
        let invalid = || TransportError::Build(format!("invalid base url {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }

    fn codebase_url(&self, id: &CodebaseId, suffix: Option<&str>) -> Result<String, ApiError> {
        let mut segments = vec!["codebases", id.as_str()];
        segments.extend(suffix);
        self.url_with_segments(&segments)
    }

    async fn exec(&self, mut req: Request) -> Result<Response, ApiError> {
        req.headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(auth) = &self.auth {
            add_auth_headers(auth.as_ref(), &mut req.headers);
        }
        if req.timeout.is_none() {
            req = req.with_timeout(self.timeout);
        }
        Ok(self.transport.execute(req).await?)
    }

    fn decode_json<T: DeserializeOwned>(url: &str, resp: &Response) -> Result<T, ApiError> {
        resp.json::<T>().map_err(|source| ApiError::Decode {
            url: url.to_string(),
            body: resp.text(),
            source,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get_json_at(self.url(path)).await
    }

    async fn get_json_at<T: DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        let resp = self.exec(Request::get(url.clone())).await?;
        Self::decode_json(&url, &resp)
    }

    /// `POST /auth/github`: URL of the external login page.
    pub async fn github_auth_url(&self) -> Result<String, ApiError> {
        let url = self.url("/auth/github");
        let resp = self.exec(Request::post(url.clone())).await?;
        let payload: AuthUrlResponse = Self::decode_json(&url, &resp)?;
        Ok(payload.auth_url)
    }

    /// `GET /auth/user`
    pub async fn current_user(&self) -> Result<Identity, ApiError> {
        self.get_json("/auth/user").await
    }

    /// `POST /auth/logout`. The acknowledgement body is ignored.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = self.url("/auth/logout");
        self.exec(Request::post(url)).await?;
        Ok(())
    }

    /// `GET /auth/status`
    pub async fn auth_status(&self) -> Result<bool, ApiError> {
        let payload: AuthStatusResponse = self.get_json("/auth/status").await?;
        Ok(payload.authenticated)
    }

    /// `POST /auth/validate`: asks the server to verify a token's signature
    /// and expiry.
    pub async fn validate_token(&self, token: &str) -> Result<TokenValidation, ApiError> {
        let url = self.url("/auth/validate");
        let req = Request::post(url.clone()).with_json(&ValidateTokenRequest { token });
        let resp = self.exec(req).await?;
        Self::decode_json(&url, &resp)
    }

    /// `POST /codebases/ingest`. Returns the id the backend assigned to the
    /// new ingestion job.
    pub async fn ingest_repository(&self, owner: &str, repo: &str) -> Result<CodebaseId, ApiError> {
        let url = self.url("/codebases/ingest");
        let req = Request::post(url.clone()).with_json(&IngestRequest { owner, repo });
        let resp = self.exec(req).await?;
        let payload: IngestResponse = Self::decode_json(&url, &resp)?;
        payload
            .into_codebase_id()
            .ok_or_else(|| ApiError::MissingField {
                url,
                field: "codebaseId",
                body: resp.text(),
            })
    }

    /// `GET /codebases/:id/status`
    pub async fn codebase_status(&self, id: &CodebaseId) -> Result<CodebaseStatus, ApiError> {
        self.get_json_at(self.codebase_url(id, Some("status"))?).await
    }

    /// `GET /codebases/:id`
    pub async fn codebase(&self, id: &CodebaseId) -> Result<CodebaseDetail, ApiError> {
        self.get_json_at(self.codebase_url(id, None)?).await
    }

    /// `DELETE /codebases/:id`. The acknowledgement body is ignored.
    pub async fn delete_codebase(&self, id: &CodebaseId) -> Result<(), ApiError> {
        let url = self.codebase_url(id, None)?;
        self.exec(Request::delete(url)).await?;
        Ok(())
    }

    /// `GET /codebases`
    pub async fn list_codebases(&self) -> Result<Vec<CodebaseSummary>, ApiError> {
        self.get_json("/codebases").await
    }

    /// `GET /github/repositories`
    pub async fn list_repositories(&self) -> Result<Vec<Repository>, ApiError> {
        self.get_json("/github/repositories").await
    }
}

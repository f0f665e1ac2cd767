//! Bodies exchanged with the backend's `/auth` endpoints.

use serde::Deserialize;
use serde::Serialize;

use crate::Identity;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrlResponse {
    pub auth_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AuthStatusResponse {
    #[serde(default)]
    pub authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidateTokenRequest<'a> {
    pub token: &'a str,
}

/// Server-side verdict on a bearer token (`POST /auth/validate`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenValidation {
    #[serde(default)]
    pub valid: bool,
    #[serde(flatten)]
    pub identity: Identity,
}

use http::HeaderMap;
use http::HeaderValue;

/// Supplies the bearer credential attached to backend requests.
///
/// Implementations should be cheap and non-blocking; callers resolve the
/// token per request so a logout takes effect immediately.
pub trait AuthProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, mostly useful in tests and one-off tooling.
#[derive(Clone, Debug)]
pub struct StaticToken(pub String);

impl AuthProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

pub(crate) fn add_auth_headers(auth: &dyn AuthProvider, headers: &mut HeaderMap) {
    if let Some(token) = auth.bearer_token()
        && let Ok(header) = HeaderValue::from_str(&format!("Bearer {token}"))
    {
        let _ = headers.insert(http::header::AUTHORIZATION, header);
    }
}

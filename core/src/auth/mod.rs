//! Session lifecycle: the stored bearer credential, the identity derived
//! from it, and the published [`SessionState`].

mod navigator;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use astra_backend_client::ApiError;
use astra_backend_client::AuthProvider;
use astra_protocol::Identity;
use astra_protocol::SessionState;
use chrono::Utc;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;

pub use navigator::Navigator;
pub use storage::CREDENTIALS_FILE;
pub use storage::CredentialStore;
pub use storage::CredentialsStoreMode;
pub use storage::EphemeralCredentialStore;
pub use storage::FileCredentialStore;
pub use storage::create_credential_store;

use crate::backend::AuthBackend;
use crate::config::Config;
use crate::notifications::NotificationBus;
use crate::token_data::decode_token;
use crate::token_data::identity_from_token;

const TOKEN_QUERY_PARAM: &str = "token";
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_LOGOUT_REDIRECT_DELAY: Duration = Duration::from_millis(500);

/// Supplies the stored credential as the bearer token for backend calls.
///
/// The token is sent even when it looks expired locally; the backend is the
/// one that decides.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    store: Arc<dyn CredentialStore>,
}

impl StoredCredential {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

impl AuthProvider for StoredCredential {
    fn bearer_token(&self) -> Option<String> {
        match self.store.load() {
            Ok(token) => token,
            Err(err) => {
                warn!("failed to read stored credential: {err}");
                None
            }
        }
    }
}

/// Answers "is the user signed in, and who are they?".
///
/// A locally valid token is trusted without a network round trip; anything
/// else falls back to asking the backend. Every outcome is published on a
/// [`watch`] channel so callers can react to `loading` flipping to `false`.
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    navigator: Arc<dyn Navigator>,
    notifications: NotificationBus,
    state: watch::Sender<SessionState>,
    login_path: String,
    logout_redirect_delay: Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store)
            .field("state", &*self.state.borrow())
            .field("login_path", &self.login_path)
            .field("logout_redirect_delay", &self.logout_redirect_delay)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        backend: Arc<dyn AuthBackend>,
        navigator: Arc<dyn Navigator>,
        notifications: NotificationBus,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        Self {
            store,
            backend,
            navigator,
            notifications,
            state,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            logout_redirect_delay: DEFAULT_LOGOUT_REDIRECT_DELAY,
        }
    }

    /// `store` should be the same store backing the backend client's
    /// [`StoredCredential`], so both see the same token.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        backend: Arc<dyn AuthBackend>,
        navigator: Arc<dyn Navigator>,
        notifications: NotificationBus,
    ) -> Self {
        Self::new(store, backend, navigator, notifications)
            .with_login_path(config.login_path.clone())
            .with_logout_redirect_delay(config.logout_redirect_delay)
    }

    pub fn with_login_path(mut self, login_path: impl Into<String>) -> Self {
        self.login_path = login_path.into();
        self
    }

    pub fn with_logout_redirect_delay(mut self, delay: Duration) -> Self {
        self.logout_redirect_delay = delay;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Bearer provider for a backend client sharing this manager's store.
    pub fn auth_provider(&self) -> Arc<dyn AuthProvider> {
        Arc::new(StoredCredential::new(Arc::clone(&self.store)))
    }

    /// The raw stored credential, valid or not. Storage errors read as
    /// "nothing stored".
    pub fn stored_token(&self) -> Option<String> {
        StoredCredential::new(Arc::clone(&self.store)).bearer_token()
    }

    /// The stored credential if it is well-formed and not yet expired.
    pub fn current_token(&self) -> Option<String> {
        self.stored_token()
            .filter(|token| !crate::token_data::is_token_expired(token, Utc::now()))
    }

    pub fn user_from_token(&self) -> Option<Identity> {
        self.stored_token()
            .as_deref()
            .and_then(identity_from_token)
    }

    pub fn is_token_expired(&self) -> bool {
        self.current_token().is_none()
    }

    /// Picks up a `token` query parameter left by the OAuth redirect.
    ///
    /// When present the token is stored and the query string (and fragment)
    /// are removed from the current history entry. Returns whether a token
    /// was stored; a second call therefore returns `false`.
    pub fn handle_auth_callback(&self) -> bool {
        let mut location = self.navigator.location();
        let Some(token) = location
            .query_pairs()
            .find(|(key, _)| key == TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
        else {
            return false;
        };

        let saved = self.store.save(&token);
        location.set_query(None);
        location.set_fragment(None);
        self.navigator.replace_history(location);

        match saved {
            Ok(()) => {
                info!("stored credential from login callback");
                self.notifications
                    .success("Login successful", "Welcome back!");
                true
            }
            Err(err) => {
                warn!("failed to store credential from login callback: {err}");
                false
            }
        }
    }

    /// Recomputes the session and publishes it.
    ///
    /// `loading` is set for the duration of the check and the final state
    /// always has `loading == false`, even if this future is dropped midway.
    pub async fn check_auth(&self) -> SessionState {
        self.state.send_modify(|state| state.loading = true);
        let guard = LoadingGuard::new(&self.state);
        let next = self.resolve_session().await;
        guard.disarm();
        self.state.send_replace(next.clone());
        next
    }

    async fn resolve_session(&self) -> SessionState {
        if let Some(claims) = self.stored_token().as_deref().and_then(decode_token)
            && !claims.is_expired_at(Utc::now())
        {
            info!("session restored from stored credential");
            return SessionState::authenticated(Some(claims.identity));
        }

        match self.server_session().await {
            Ok(Some(user)) => {
                info!("session confirmed by backend");
                SessionState::authenticated(Some(user))
            }
            Ok(None) => {
                self.clear_credential();
                SessionState::unauthenticated()
            }
            Err(err) => {
                warn!("auth check failed: {err}");
                self.clear_credential();
                SessionState::unauthenticated()
            }
        }
    }

    async fn server_session(&self) -> Result<Option<Identity>, ApiError> {
        if !self.backend.auth_status().await? {
            return Ok(None);
        }
        Ok(Some(self.backend.current_user().await?))
    }

    /// Sends the user to the external login page. On failure the user gets
    /// an error notification and the session is untouched.
    pub async fn login(&self) -> bool {
        match self.backend.auth_url().await {
            Ok(url) => {
                info!("redirecting to external login");
                self.navigator.assign(&url);
                true
            }
            Err(err) => {
                warn!("login failed: {err}");
                self.notifications
                    .error("Login failed", "Could not start sign-in. Please try again.");
                false
            }
        }
    }

    /// Signs out locally regardless of whether the backend call succeeds,
    /// then redirects to the login view after a short delay.
    pub async fn logout(&self) {
        if let Err(err) = self.backend.logout().await {
            warn!("backend logout failed, clearing local session anyway: {err}");
        }
        self.clear_credential();
        self.state.send_replace(SessionState::unauthenticated());
        self.notifications
            .success("Logged out successfully", "See you next time.");
        tokio::time::sleep(self.logout_redirect_delay).await;
        self.navigator.assign(&self.login_path);
    }

    fn clear_credential(&self) {
        match self.store.delete() {
            Ok(true) => info!("cleared stored credential"),
            Ok(false) => {}
            Err(err) => warn!("failed to clear stored credential: {err}"),
        }
    }
}

/// Publishes `loading = false` if a check is abandoned before it finishes.
struct LoadingGuard<'a> {
    state: Option<&'a watch::Sender<SessionState>>,
}

impl<'a> LoadingGuard<'a> {
    fn new(state: &'a watch::Sender<SessionState>) -> Self {
        Self { state: Some(state) }
    }

    fn disarm(mut self) {
        self.state = None;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.send_modify(|state| state.loading = false);
        }
    }
}

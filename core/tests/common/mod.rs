#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Mutex;

use anyhow::Context;
use anyhow::Result;
use astra_core::auth::Navigator;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde_json::json;
use url::Url;

/// Builds an unsigned `header.payload.signature` token for `username`
/// expiring `expires_in` seconds from now (negative for already expired).
pub fn encode_token(username: &str, expires_in: i64) -> Result<String> {
    let header = json!({ "alg": "none", "typ": "JWT" });
    let payload = json!({
        "userId": 1,
        "username": username,
        "email": format!("{username}@example.com"),
        "exp": Utc::now().timestamp() + expires_in,
    });
    let header_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).context("serialize jwt header")?);
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).context("serialize jwt payload")?);
    let signature_b64 = URL_SAFE_NO_PAD.encode(b"signature");
    Ok(format!("{header_b64}.{payload_b64}.{signature_b64}"))
}

/// Navigator that records every navigation instead of performing it.
pub struct RecordingNavigator {
    location: Mutex<Url>,
    assigned: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn at(url: &str) -> Result<Self> {
        Ok(Self {
            location: Mutex::new(Url::parse(url)?),
            assigned: Mutex::new(Vec::new()),
        })
    }

    pub fn location_now(&self) -> Url {
        self.location.lock().unwrap().clone()
    }

    pub fn assigned(&self) -> Vec<String> {
        self.assigned.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn location(&self) -> Url {
        self.location_now()
    }

    fn replace_history(&self, url: Url) {
        *self.location.lock().unwrap() = url;
    }

    fn assign(&self, target: &str) {
        self.assigned.lock().unwrap().push(target.to_string());
    }
}

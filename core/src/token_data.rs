//! Local, unverified decoding of the bearer token.
//!
//! The claims are trusted for display and for deciding whether a network
//! round trip is needed. They are not a security boundary: the backend
//! verifies the signature on every protected call.

use astra_protocol::Identity;
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::de::Deserializer;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(flatten)]
    pub identity: Identity,
    /// Expiry as Unix seconds.
    #[serde(default, deserialize_with = "deserialize_exp")]
    pub exp: Option<i64>,
}

impl TokenClaims {
    /// A token without an `exp` claim is never considered valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => exp.saturating_mul(1000) <= now.timestamp_millis(),
            None => true,
        }
    }
}

fn deserialize_exp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    })
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let segment = segment.trim_end_matches('=');
    if segment.is_empty() {
        return None;
    }
    URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .ok()
}

fn decode_json_object(segment: &str) -> Option<serde_json::Map<String, Value>> {
    let bytes = decode_segment(segment)?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Decodes the claims of a `header.payload.signature` token. Anything that
/// is not shaped like that yields `None`.
pub fn decode_token(raw: &str) -> Option<TokenClaims> {
    let mut parts = raw.trim().split('.');
    let (Some(header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    decode_json_object(header)?;
    let payload = decode_json_object(payload)?;
    serde_json::from_value(Value::Object(payload)).ok()
}

pub fn identity_from_token(raw: &str) -> Option<Identity> {
    decode_token(raw).map(|claims| claims.identity)
}

/// Malformed tokens count as expired.
pub fn is_token_expired(raw: &str, now: DateTime<Utc>) -> bool {
    decode_token(raw).is_none_or(|claims| claims.is_expired_at(now))
}

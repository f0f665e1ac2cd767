use serde::Deserialize;
use serde::Serialize;
use serde::de;
use serde::de::Deserializer;
use serde_json::Value;

/// Who the current user is, as far as the client can tell.
///
/// Populated either from the claims of a locally stored token or from the
/// backend's `/auth/user` endpoint. Every field is optional because neither
/// source guarantees them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(
        default,
        deserialize_with = "deserialize_optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    /// Best human-readable label for the user.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.email.as_deref())
            .or(self.user_id.as_deref())
            .unwrap_or("unknown user")
    }
}

/// In-memory view of the authentication state for the lifetime of the
/// process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user: Option<Identity>,
    pub authenticated: bool,
    pub loading: bool,
}

impl SessionState {
    /// State before the first auth check has completed.
    pub fn initial() -> Self {
        Self {
            user: None,
            authenticated: false,
            loading: true,
        }
    }

    pub fn authenticated(user: Option<Identity>) -> Self {
        Self {
            user,
            authenticated: true,
            loading: false,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            user: None,
            authenticated: false,
            loading: false,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}

pub(crate) fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

pub(crate) fn deserialize_optional_string_or_number<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

/// Server-assigned identifier for an ingested codebase.
///
/// The backend currently emits numeric ids, but the value is only ever used
/// as an opaque path segment, so both JSON numbers and strings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodebaseId(String);

impl CodebaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CodebaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for CodebaseId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<i64> for CodebaseId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for CodebaseId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CodebaseId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        crate::session::deserialize_string_or_number(deserializer).map(Self)
    }
}

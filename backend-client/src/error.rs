use astra_client::TransportError;
use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("decode error for {url}: {source}; body={body}")]
    Decode {
        url: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{url} succeeded but the response has no {field}; body={body}")]
    MissingField {
        url: String,
        field: &'static str,
        body: String,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(err) => err.status(),
            Self::Decode { .. } | Self::MissingField { .. } => None,
        }
    }

    /// Whether the same call might succeed if retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::Decode { .. } | Self::MissingField { .. } => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }
}

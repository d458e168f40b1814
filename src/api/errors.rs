//! Error types for the sidecar alerts client.

/// Failure talking to the sidecar.
///
/// [`ApiError::is_offline`] is the one place that decides whether a failure
/// means "the sidecar is unreachable" as opposed to "it answered, but badly".
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with HTTP {status}")]
    Status { status: u16, url: String },
    #[error("failed to parse response from {url}")]
    ParseFailed {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid sidecar URL")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Whether the sidecar should be treated as offline.
    ///
    /// True for failures before any response status exists (connection
    /// refused, DNS, timeouts) and for 5xx responses. Client errors and
    /// undecodable bodies mean the sidecar is up.
    pub fn is_offline(&self) -> bool {
        match self {
            ApiError::Transport { .. } => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::ParseFailed { .. } | ApiError::InvalidUrl(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

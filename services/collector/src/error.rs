//! Collector error types.

/// Errors produced while talking to the catalog or downloading resources.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The per-request timeout elapsed.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("resource '{0}' has no download URL")]
    EmptyUrl(String),

    /// The catalog answered but the body is not the expected JSON.
    #[error("catalog response from {url} could not be decoded: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid collector configuration: {0}")]
    Config(String),
}

impl CollectorError {
    /// Classify a reqwest error for `url`.
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }
        Self::Http {
            url: url.to_string(),
            source: err,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Http { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::EmptyUrl(_) | Self::Decode { .. } | Self::Config(_) => false,
        }
    }
}

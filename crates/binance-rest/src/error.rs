use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("failed to build HTTP client: {0}")]
    RequestBuild(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl RestError {
    /// Transport-level and throttling failures are worth retrying; a 4xx
    /// (other than 429) will just fail again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContentError>;

#[derive(Debug, Error)]
pub enum ContentError {
    /// Bad credentials. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider asked us to slow down. Retried with a higher backoff base.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Well-formed API response carrying a non-success status.
    #[error("API error: {0}")]
    Soft(String),

    /// Network failures, timeouts, 5xx. Retried with a short backoff.
    #[error("Network error: {0}")]
    Transient(String),
}

impl From<reqwest::Error> for ContentError {
    fn from(err: reqwest::Error) -> Self {
        ContentError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for ContentError {
    fn from(err: serde_json::Error) -> Self {
        ContentError::Soft(format!("malformed response body: {err}"))
    }
}

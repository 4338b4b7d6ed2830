use thiserror::Error;

/// Error taxonomy for the scan pipeline.
///
/// Retryable classes (`RateLimited`, `Overloaded`, `Transient`) are retried
/// inside the component that owns the call; by the time one of these reaches
/// the orchestrator its retry budget is exhausted. `Cancelled` is a clean
/// stop, not a failure.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Authentication failed: {0}. Check your API credentials in settings.")]
    Auth(String),

    #[error("Input too large for the model: {0}. Reduce the account list or time window.")]
    InputTooLarge(String),

    #[error("Rate limited by the provider: {0}")]
    RateLimited(String),

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Network error: {0}")]
    Transient(String),

    #[error("No posts found in the selected time window for any account")]
    NoContent,

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Store(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScanError {
    /// Fatal errors are surfaced immediately and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::Auth(_) | ScanError::InputTooLarge(_) | ScanError::NoContent
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classes() {
        assert!(ScanError::Auth("bad key".into()).is_fatal());
        assert!(ScanError::NoContent.is_fatal());
        assert!(!ScanError::Transient("timeout".into()).is_fatal());
        assert!(!ScanError::Cancelled.is_fatal());
    }

    #[test]
    fn messages_are_actionable() {
        let msg = ScanError::InputTooLarge("prompt is 210k tokens".to_string()).to_string();
        assert!(msg.contains("Reduce the account list"));
    }
}

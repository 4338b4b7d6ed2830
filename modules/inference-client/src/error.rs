use thiserror::Error;

pub type Result<T> = std::result::Result<T, InferenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    BadAuth,
    InputTooLarge,
    InvalidRequest,
    Billing,
}

/// Inference failures, classified by retry policy:
/// fatal — never retried, surfaced immediately with a user-facing message;
/// rate-limited/overloaded — retried with a high backoff base, bounded;
/// transient — retried with a short backoff base.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{1}")]
    Fatal(FatalReason, String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Network error: {0}")]
    Transient(String),

    #[error("Inference cancelled")]
    Cancelled,
}

impl InferenceError {
    /// Classify an HTTP error response before any stream bytes are read.
    pub fn from_status(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        match status {
            401 | 403 => InferenceError::Fatal(FatalReason::BadAuth, format!("Invalid API key: {body}")),
            402 => InferenceError::Fatal(FatalReason::Billing, format!("Billing issue: {body}")),
            400 | 413 if lower.contains("too long")
                || lower.contains("too large")
                || lower.contains("max_tokens")
                || lower.contains("token limit") =>
            {
                InferenceError::Fatal(FatalReason::InputTooLarge, body.to_string())
            }
            400 if lower.contains("credit") || lower.contains("billing") => {
                InferenceError::Fatal(FatalReason::Billing, body.to_string())
            }
            400 | 404 | 422 => {
                InferenceError::Fatal(FatalReason::InvalidRequest, format!("Invalid request: {body}"))
            }
            429 => InferenceError::RateLimited(body.to_string()),
            529 => InferenceError::Overloaded(body.to_string()),
            _ => InferenceError::Transient(format!("status {status}: {body}")),
        }
    }

    /// Classify an error event delivered inside the stream.
    pub fn from_stream_event(error_type: &str, message: &str) -> Self {
        match error_type {
            "overloaded_error" => InferenceError::Overloaded(message.to_string()),
            "rate_limit_error" => InferenceError::RateLimited(message.to_string()),
            "authentication_error" | "permission_error" => {
                InferenceError::Fatal(FatalReason::BadAuth, message.to_string())
            }
            "invalid_request_error" if message.to_lowercase().contains("too long") => {
                InferenceError::Fatal(FatalReason::InputTooLarge, message.to_string())
            }
            "invalid_request_error" => {
                InferenceError::Fatal(FatalReason::InvalidRequest, message.to_string())
            }
            _ => InferenceError::Transient(format!("{error_type}: {message}")),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, InferenceError::Fatal(_, _))
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::Transient(format!("request timed out: {err}"))
        } else {
            InferenceError::Transient(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_fatal() {
        assert!(InferenceError::from_status(401, "invalid x-api-key").is_fatal());
        assert!(InferenceError::from_status(403, "forbidden").is_fatal());
    }

    #[test]
    fn oversized_prompt_is_fatal_input_too_large() {
        let err = InferenceError::from_status(400, "prompt is too long: 215000 tokens");
        assert!(matches!(err, InferenceError::Fatal(FatalReason::InputTooLarge, _)));
    }

    #[test]
    fn rate_limit_and_overload_are_retryable() {
        assert!(matches!(
            InferenceError::from_status(429, "slow down"),
            InferenceError::RateLimited(_)
        ));
        assert!(matches!(
            InferenceError::from_status(529, "overloaded"),
            InferenceError::Overloaded(_)
        ));
    }

    #[test]
    fn unknown_5xx_is_transient() {
        assert!(matches!(
            InferenceError::from_status(502, "bad gateway"),
            InferenceError::Transient(_)
        ));
    }

    #[test]
    fn stream_error_events_classify() {
        assert!(matches!(
            InferenceError::from_stream_event("overloaded_error", "busy"),
            InferenceError::Overloaded(_)
        ));
        assert!(InferenceError::from_stream_event("authentication_error", "bad key").is_fatal());
    }
}

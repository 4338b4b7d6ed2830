use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use tickerscout_common::CancelToken;

use crate::error::{InferenceError, Result};
use crate::sse::SseBuffer;
use crate::types::{
    Completion, CompletionRequest, Delta, InferenceProgress, StreamEvent, WireRequest,
};

/// How the endpoint authenticates us: direct provider calls take the user's
/// key in `x-api-key` (BYOK), the managed backend takes a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    ProviderKey,
    Bearer,
}

pub struct StreamingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    auth: AuthMode,
}

impl StreamingClient {
    /// BYOK path: straight to the provider with the user's own key.
    pub fn direct(api_key: &str) -> Self {
        Self::new("https://api.anthropic.com", api_key, AuthMode::ProviderKey)
    }

    /// Managed path: the backend proxies inference under its own keys.
    pub fn managed(base_url: &str, api_key: &str) -> Self {
        Self::new(base_url, api_key, AuthMode::Bearer)
    }

    pub fn new(base_url: &str, api_key: &str, auth: AuthMode) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            auth,
        }
    }

    /// Issue one streamed completion, accumulating text and token counts.
    ///
    /// Progress (elapsed time + running token count) is pushed through
    /// `progress` as deltas arrive. Cancellation is observed before the
    /// request and between every chunk.
    pub async fn stream_completion(
        &self,
        request: &CompletionRequest,
        progress: Option<&UnboundedSender<InferenceProgress>>,
        cancel: &CancelToken,
    ) -> Result<Completion> {
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }

        let url = format!("{}/v1/messages", self.base_url);
        let wire = WireRequest::from_completion(request);
        let started = Instant::now();

        debug!(model = %request.model, chars = request.user_text.len(), "Streaming inference request");

        let mut builder = self
            .http
            .post(&url)
            .timeout(request.timeout)
            .header("anthropic-version", "2023-06-01")
            .json(&wire);
        builder = match self.auth {
            AuthMode::ProviderKey => builder.header("x-api-key", &self.api_key),
            AuthMode::Bearer => builder.bearer_auth(&self.api_key),
        };

        let resp = builder.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::from_status(status.as_u16(), &body));
        }

        let mut stream = resp.bytes_stream();
        let mut sse = SseBuffer::new();
        let mut text = String::new();
        let mut output_tokens: u32 = 0;

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
            };
            let Some(chunk) = chunk else { break };
            let bytes = chunk?;

            for payload in sse.push(&String::from_utf8_lossy(&bytes)) {
                let event: StreamEvent = match serde_json::from_str(&payload) {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(error = %e, "Unparseable stream event, skipping");
                        continue;
                    }
                };
                match event {
                    StreamEvent::ContentBlockDelta {
                        delta: Delta::TextDelta { text: t },
                    } => {
                        output_tokens = apply_text_delta(&mut text, &t, output_tokens);
                    }
                    StreamEvent::MessageDelta { usage } => {
                        if let Some(u) = usage {
                            output_tokens = u.output_tokens;
                        }
                    }
                    StreamEvent::Error { error } => {
                        return Err(InferenceError::from_stream_event(
                            &error.error_type,
                            &error.message,
                        ));
                    }
                    StreamEvent::MessageStop {} => {}
                    StreamEvent::MessageStart { .. }
                    | StreamEvent::ContentBlockDelta { .. }
                    | StreamEvent::Other => {}
                }
                if let Some(tx) = progress {
                    let _ = tx.send(InferenceProgress {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        output_tokens,
                    });
                }
            }
        }

        debug!(
            model = %request.model,
            output_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Streamed inference complete"
        );

        Ok(Completion {
            text,
            output_tokens,
        })
    }
}

/// Append a text delta and return the running output-token estimate
/// (~4 chars per token) until the final usage frame supplies the real count.
/// The estimate includes the delta just appended.
fn apply_text_delta(text: &mut String, delta: &str, output_tokens: u32) -> u32 {
    text.push_str(delta);
    output_tokens.max((text.len() / 4) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_counts_the_current_delta() {
        let mut text = String::new();
        let estimate = apply_text_delta(&mut text, "12345678", 0);
        assert_eq!(text, "12345678");
        assert_eq!(estimate, 2);
    }

    #[test]
    fn token_estimate_never_regresses() {
        let mut text = String::new();
        // A real usage frame may already have reported a higher count.
        let estimate = apply_text_delta(&mut text, "abcd", 40);
        assert_eq!(estimate, 40);
    }
}

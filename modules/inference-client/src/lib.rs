pub mod client;
pub mod error;
pub mod sse;
pub mod types;

pub use client::{AuthMode, StreamingClient};
pub use error::{FatalReason, InferenceError, Result};
pub use types::{Completion, CompletionRequest, InferenceProgress};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use tickerscout_common::CancelToken;

/// Seam between the analyzer and the inference transport. Tests substitute
/// scripted completers; production wires `StreamingClient`.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
        progress: Option<UnboundedSender<InferenceProgress>>,
        cancel: &CancelToken,
    ) -> Result<Completion>;
}

#[async_trait]
impl Completer for StreamingClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        progress: Option<UnboundedSender<InferenceProgress>>,
        cancel: &CancelToken,
    ) -> Result<Completion> {
        self.stream_completion(&request, progress.as_ref(), cancel)
            .await
    }
}

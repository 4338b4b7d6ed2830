use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{info, warn};

use inference_client::{Completer, CompletionRequest, FatalReason, InferenceError, InferenceProgress};
use tickerscout_common::{
    Batch, CancelToken, EngineSettings, ModelProfile, ScanError, ScanEvent, Signal,
};

use crate::parser::parse_signals;

pub const ANALYST_SYSTEM_PROMPT: &str = r#"You are a trading-signal analyst. You will receive a block of social media posts, grouped by account. Each post is delimited by a header line carrying its number, timestamp, and URL.

Extract every trading-relevant observation into a JSON array. Each element:
{
  "title": "short headline for the observation",
  "summary": "one or two sentences of substance",
  "category": "earnings | macro | technicals | news | position | general",
  "source": "account handle the post came from, without the @",
  "tickers": [{"symbol": "NVDA", "action": "buy | sell | hold | watch | mixed"}],
  "post_url": "URL from the post's header line",
  "links": ["any URLs mentioned in the post body"],
  "post_time": "timestamp from the post's header line, RFC 3339"
}

Rules:
- Only include posts with actual trading substance. Skip banter, memes, and engagement bait.
- Use the exact post_url from the header line of the post the observation came from.
- Ticker symbols uppercase, without the $ prefix.
- If a post discusses a company without taking a stance, use action "watch".
- Output the JSON array only. No prose before or after."#;

const MAX_OUTPUT_TOKENS: u32 = 8192;

/// Per-batch analysis output: the parsed signals plus a cache entry for every
/// post URL the batch carried. URLs that produced no signal get an empty
/// entry, which is what stops them being re-inferred next scan.
#[derive(Debug)]
pub struct BatchAnalysis {
    pub signals: Vec<Signal>,
    pub entries: HashMap<String, Vec<Signal>>,
}

/// Drives one inference call per batch with class-aware retries, then parses
/// the output.
pub struct Analyzer<'a> {
    completer: &'a dyn Completer,
    settings: &'a EngineSettings,
    model: &'a ModelProfile,
    system_prompt: &'a str,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        completer: &'a dyn Completer,
        settings: &'a EngineSettings,
        model: &'a ModelProfile,
        system_prompt: &'a str,
    ) -> Self {
        Self {
            completer,
            settings,
            model,
            system_prompt,
        }
    }

    pub async fn analyze_batch(
        &self,
        batch: &Batch,
        events: Option<&UnboundedSender<ScanEvent>>,
        cancel: &CancelToken,
    ) -> Result<BatchAnalysis, ScanError> {
        let completion = self.complete_with_retry(batch, events, cancel).await?;
        info!(
            output_tokens = completion.output_tokens,
            accounts = batch.accounts.len(),
            "Batch inference complete"
        );

        let signals = parse_signals(&completion.text);

        let mut entries: HashMap<String, Vec<Signal>> = batch
            .post_urls
            .iter()
            .map(|url| (url.clone(), Vec::new()))
            .collect();
        for signal in &signals {
            if let Some(url) = &signal.post_url {
                if let Some(slot) = entries.get_mut(url) {
                    slot.push(signal.clone());
                }
            }
        }

        Ok(BatchAnalysis { signals, entries })
    }

    async fn complete_with_retry(
        &self,
        batch: &Batch,
        events: Option<&UnboundedSender<ScanEvent>>,
        cancel: &CancelToken,
    ) -> Result<inference_client::Completion, ScanError> {
        let request = CompletionRequest {
            model: self.model.id.clone(),
            system: self.system_prompt.to_string(),
            user_text: batch.text.clone(),
            image_urls: batch.image_urls.clone(),
            max_tokens: MAX_OUTPUT_TOKENS,
            timeout: self.settings.timeout_for(self.model),
        };

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            // Relay streaming progress onto the scan's event channel.
            let progress = events.map(|events| {
                let (tx, mut rx) = unbounded_channel::<InferenceProgress>();
                let events = events.clone();
                tokio::spawn(async move {
                    while let Some(p) = rx.recv().await {
                        let _ = events.send(ScanEvent::Inference {
                            elapsed_ms: p.elapsed_ms,
                            output_tokens: p.output_tokens,
                        });
                    }
                });
                tx
            });

            let err = match self.completer.complete(request.clone(), progress, cancel).await {
                Ok(completion) => return Ok(completion),
                Err(e) => e,
            };

            let base = match &err {
                InferenceError::Fatal(reason, msg) => {
                    return Err(match reason {
                        FatalReason::BadAuth => ScanError::Auth(msg.clone()),
                        FatalReason::InputTooLarge => ScanError::InputTooLarge(msg.clone()),
                        FatalReason::InvalidRequest | FatalReason::Billing => {
                            ScanError::Other(anyhow::anyhow!("{msg}"))
                        }
                    });
                }
                InferenceError::Cancelled => return Err(ScanError::Cancelled),
                InferenceError::RateLimited(_) | InferenceError::Overloaded(_) => {
                    self.settings.rate_limit_backoff_base
                }
                InferenceError::Transient(_) => self.settings.transient_backoff_base,
            };

            attempt += 1;
            if attempt > self.settings.inference_max_retries {
                return Err(match err {
                    InferenceError::RateLimited(msg) => ScanError::RateLimited(msg),
                    InferenceError::Overloaded(msg) => ScanError::Overloaded(msg),
                    other => ScanError::Transient(other.to_string()),
                });
            }

            let delay = backoff_delay(base, attempt - 1, self.settings.backoff_cap);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Inference failed, retrying after backoff"
            );
            if let Some(events) = events {
                let _ = events.send(ScanEvent::Status {
                    message: format!(
                        "Provider busy, retrying in {}s (attempt {attempt})",
                        delay.as_secs().max(1)
                    ),
                });
            }
            if !cancel.sleep(delay).await {
                return Err(ScanError::Cancelled);
            }
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter = Duration::from_millis(rand::rng().random_range(0..500));
    std::cmp::min(exp, cap) + jitter
}

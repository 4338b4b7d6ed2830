use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend service (content fetch, cross-client cache,
    /// managed inference, scan persistence).
    pub backend_url: String,
    /// Backend API key (managed-key mode).
    pub backend_api_key: String,
    /// Direct provider API key (BYOK mode). Empty when using managed keys.
    pub provider_api_key: String,
    /// When true, inference goes straight to the provider with the user's
    /// own key instead of through the backend.
    pub byok: bool,
    pub model_id: String,
    /// Custom analyst prompt; `None` means the built-in prompt.
    pub prompt_override: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        let byok = env::var("TICKERSCOUT_BYOK")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            backend_url: env::var("TICKERSCOUT_BACKEND_URL")
                .unwrap_or_else(|_| "https://api.tickerscout.app".to_string()),
            backend_api_key: if byok {
                env::var("TICKERSCOUT_API_KEY").unwrap_or_default()
            } else {
                required_env("TICKERSCOUT_API_KEY")
            },
            provider_api_key: if byok {
                required_env("ANTHROPIC_API_KEY")
            } else {
                env::var("ANTHROPIC_API_KEY").unwrap_or_default()
            },
            byok,
            model_id: env::var("TICKERSCOUT_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            prompt_override: env::var("TICKERSCOUT_PROMPT").ok().filter(|p| !p.is_empty()),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

/// The active model as supplied by the settings collaborator.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub id: String,
    /// Slower/larger models get a wider request timeout and a smaller
    /// inference worker pool.
    pub slow: bool,
}

impl ModelProfile {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let slow = id.contains("opus");
        Self { id, slow }
    }
}

/// Tuning knobs for the scan engine. Injected rather than read from globals
/// so tests can shrink limits and delays.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Per-batch character budget when no images are attached.
    pub batch_char_limit: usize,
    /// Reduced budget when a batch carries images (images consume context).
    pub batch_char_limit_with_images: usize,
    pub max_images_per_batch: usize,
    /// Concurrent account fetches.
    pub fetch_concurrency: usize,
    /// Concurrent inference calls for fast models; slow models get one less.
    pub inference_concurrency: usize,
    pub fetch_page_size: u32,
    /// Hard cap on pages per account; guards against malformed cursors.
    pub fetch_page_cap: u32,
    pub fetch_cache_ttl: Duration,
    pub local_cache_bound: usize,
    pub fetch_max_attempts: u32,
    pub inference_max_retries: u32,
    pub transient_backoff_base: Duration,
    pub rate_limit_backoff_base: Duration,
    pub backoff_cap: Duration,
    pub request_timeout: Duration,
    pub request_timeout_slow: Duration,
    pub history_bound: usize,
    /// Repeat scans of the same request inside this window collapse into one
    /// history entry.
    pub history_collapse_window: Duration,
    /// Delay between accounts on the best-effort prefetch path.
    pub prefetch_stagger: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_char_limit: 38_000,
            batch_char_limit_with_images: 26_000,
            max_images_per_batch: 4,
            fetch_concurrency: 3,
            inference_concurrency: 3,
            fetch_page_size: 50,
            fetch_page_cap: 10,
            fetch_cache_ttl: Duration::from_secs(2 * 60 * 60),
            local_cache_bound: 2000,
            fetch_max_attempts: 4,
            inference_max_retries: 3,
            transient_backoff_base: Duration::from_millis(1500),
            rate_limit_backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
            request_timeout: Duration::from_secs(120),
            request_timeout_slow: Duration::from_secs(240),
            history_bound: 5,
            history_collapse_window: Duration::from_secs(10 * 60),
            prefetch_stagger: Duration::from_secs(2),
        }
    }
}

impl EngineSettings {
    pub fn concurrency_for(&self, model: &ModelProfile) -> usize {
        if model.slow {
            self.inference_concurrency.saturating_sub(1).max(1)
        } else {
            self.inference_concurrency
        }
    }

    pub fn timeout_for(&self, model: &ModelProfile) -> Duration {
        if model.slow {
            self.request_timeout_slow
        } else {
            self.request_timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_models_narrow_the_pool_and_widen_the_timeout() {
        let settings = EngineSettings::default();
        let fast = ModelProfile::new("claude-sonnet-4-5");
        let slow = ModelProfile::new("claude-opus-4-1");
        assert!(!fast.slow);
        assert!(slow.slow);
        assert_eq!(settings.concurrency_for(&fast), 3);
        assert_eq!(settings.concurrency_for(&slow), 2);
        assert!(settings.timeout_for(&slow) > settings.timeout_for(&fast));
    }

    #[test]
    fn concurrency_never_drops_to_zero() {
        let settings = EngineSettings {
            inference_concurrency: 1,
            ..Default::default()
        };
        let slow = ModelProfile::new("claude-opus-4-1");
        assert_eq!(settings.concurrency_for(&slow), 1);
    }
}

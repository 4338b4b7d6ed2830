use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use content_client::{ContentApi, ContentError};
use tickerscout_common::{CancelToken, EngineSettings, Post, ScanError};

/// In-process cache of fetched windows, keyed `(account, window_days)` with a
/// fixed TTL. Injected into the fetcher so the pipeline stays testable and
/// reentrant; hits bypass the network entirely.
#[derive(Debug, Default)]
pub struct FetchCache {
    entries: Mutex<HashMap<(String, u32), (Vec<Post>, DateTime<Utc>)>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account: &str, window_days: u32, ttl: Duration) -> Option<Vec<Post>> {
        let entries = self.entries.lock().expect("fetch cache poisoned");
        let (posts, fetched_at) = entries.get(&(account.to_string(), window_days))?;
        let age = Utc::now().signed_duration_since(*fetched_at);
        if age.to_std().map(|a| a < ttl).unwrap_or(false) {
            Some(posts.clone())
        } else {
            None
        }
    }

    pub fn put(&self, account: &str, window_days: u32, posts: Vec<Post>) {
        let mut entries = self.entries.lock().expect("fetch cache poisoned");
        entries.insert((account.to_string(), window_days), (posts, Utc::now()));
    }
}

/// Paginated retrieval of an account's recent posts, bounded by a time
/// cutoff, with per-class retry/backoff.
pub struct ContentFetcher<'a> {
    api: &'a dyn ContentApi,
    cache: &'a FetchCache,
    settings: &'a EngineSettings,
}

impl<'a> ContentFetcher<'a> {
    pub fn new(api: &'a dyn ContentApi, cache: &'a FetchCache, settings: &'a EngineSettings) -> Self {
        Self {
            api,
            cache,
            settings,
        }
    }

    /// Fetch posts newer than `now - window_days`. Paginates until the cutoff
    /// is crossed, the cursor runs out, or the page cap is hit (malformed
    /// responses must not paginate forever).
    pub async fn fetch(
        &self,
        account: &str,
        window_days: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<Post>, ScanError> {
        if let Some(posts) = self.cache.get(account, window_days, self.settings.fetch_cache_ttl) {
            debug!(account, window_days, posts = posts.len(), "Fetch cache hit");
            return Ok(posts);
        }

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(window_days));
        let mut posts: Vec<Post> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut consecutive_soft_errors = 0u32;
        let mut soft_abort: Option<String> = None;

        for page_no in 0..self.settings.fetch_page_cap {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let page = match self.fetch_page_with_retry(account, cursor.as_deref(), cancel).await {
                Ok(page) => {
                    consecutive_soft_errors = 0;
                    page
                }
                Err(PageError::Soft(msg)) => {
                    consecutive_soft_errors += 1;
                    if consecutive_soft_errors >= 2 {
                        warn!(
                            account,
                            page = page_no,
                            error = msg.as_str(),
                            "Two consecutive soft API errors, aborting pagination"
                        );
                        soft_abort = Some(msg);
                        break;
                    }
                    continue;
                }
                Err(PageError::Hard(e)) => return Err(e),
            };

            let oldest = page.posts.iter().map(|p| p.created_at).min();
            let has_next = page.next_cursor.is_some();
            posts.extend(page.posts);
            cursor = page.next_cursor;

            match oldest {
                Some(ts) if ts < cutoff => {
                    debug!(account, page = page_no, "Cutoff reached, stopping pagination");
                    break;
                }
                _ if !has_next => break,
                _ => {}
            }
        }

        posts.retain(|p| p.created_at >= cutoff);
        if posts.is_empty() {
            // An account that produced nothing but API refusals has failed,
            // not returned an empty window.
            if let Some(msg) = soft_abort {
                return Err(ScanError::Transient(msg));
            }
        }
        info!(account, window_days, posts = posts.len(), "Account fetch complete");
        self.cache.put(account, window_days, posts.clone());
        Ok(posts)
    }

    /// One page with exponential backoff and jitter. The rate-limit backoff
    /// base is higher than the generic transient base; auth errors are never
    /// retried.
    async fn fetch_page_with_retry(
        &self,
        account: &str,
        cursor: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<content_client::ContentPage, PageError> {
        let max = self.settings.fetch_max_attempts;
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(PageError::Hard(ScanError::Cancelled));
            }
            let result = self
                .api
                .fetch_page(account, cursor, self.settings.fetch_page_size)
                .await;
            let err = match result {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };
            let base = match &err {
                ContentError::Auth(msg) => {
                    return Err(PageError::Hard(ScanError::Auth(msg.clone())));
                }
                // Well-formed non-success: not worth hammering, surface to
                // the pagination loop's consecutive-soft-error guard.
                ContentError::Soft(msg) => return Err(PageError::Soft(msg.clone())),
                ContentError::RateLimited(_) => self.settings.rate_limit_backoff_base,
                ContentError::Transient(_) => self.settings.transient_backoff_base,
            };
            attempt += 1;
            if attempt >= max {
                return Err(PageError::Hard(match err {
                    ContentError::RateLimited(msg) => ScanError::RateLimited(msg),
                    other => ScanError::Transient(other.to_string()),
                }));
            }
            let delay = backoff_delay(base, attempt - 1, self.settings.backoff_cap);
            warn!(
                account,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Page fetch failed, retrying after backoff"
            );
            if !cancel.sleep(delay).await {
                return Err(PageError::Hard(ScanError::Cancelled));
            }
        }
    }

    /// Best-effort cache warming ahead of an explicit scan. Staggered to
    /// avoid bursts; swallows every error.
    pub async fn prefetch(&self, accounts: &[String], window_days: u32, cancel: &CancelToken) {
        for (i, account) in accounts.iter().enumerate() {
            if cancel.is_cancelled() {
                return;
            }
            if i > 0 && !cancel.sleep(self.settings.prefetch_stagger).await {
                return;
            }
            if let Err(e) = self.fetch(account, window_days, cancel).await {
                debug!(account = account.as_str(), error = %e, "Prefetch failed, ignoring");
            }
        }
    }
}

enum PageError {
    /// Abort the whole account fetch.
    Hard(ScanError),
    /// Well-formed API refusal; pagination may continue past one of these.
    Soft(String),
}

/// Exponential backoff with jitter: `base * 2^attempt + jitter(0..500ms)`,
/// capped.
fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter = Duration::from_millis(rand::rng().random_range(0..500));
    std::cmp::min(exp, cap) + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use content_client::ContentPage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn post(id: &str, age_hours: i64) -> Post {
        Post {
            id: id.to_string(),
            text: format!("post {id}"),
            created_at: Utc::now() - chrono::Duration::hours(age_hours),
            likes: 0,
            reposts: 0,
            replies: 0,
            url: format!("https://x.com/a/status/{id}"),
            is_reply: false,
            reply_target: None,
            quoted_text: None,
            media_urls: vec![],
        }
    }

    /// Scripted API: returns a fixed sequence of page results, counting calls.
    struct ScriptedApi {
        pages: Vec<content_client::Result<ContentPage>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(pages: Vec<content_client::Result<ContentPage>>) -> Self {
            Self {
                pages,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentApi for ScriptedApi {
        async fn fetch_page(
            &self,
            _account: &str,
            _cursor: Option<&str>,
            _page_size: u32,
        ) -> content_client::Result<ContentPage> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(i) {
                Some(Ok(page)) => Ok(page.clone()),
                Some(Err(e)) => Err(clone_err(e)),
                None => Ok(ContentPage {
                    posts: vec![],
                    next_cursor: None,
                }),
            }
        }
    }

    fn clone_err(e: &ContentError) -> ContentError {
        match e {
            ContentError::Auth(m) => ContentError::Auth(m.clone()),
            ContentError::RateLimited(m) => ContentError::RateLimited(m.clone()),
            ContentError::Soft(m) => ContentError::Soft(m.clone()),
            ContentError::Transient(m) => ContentError::Transient(m.clone()),
        }
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            transient_backoff_base: Duration::from_millis(1),
            rate_limit_backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
            prefetch_stagger: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stops_when_page_crosses_cutoff() {
        let api = ScriptedApi::new(vec![
            Ok(ContentPage {
                posts: vec![post("1", 1), post("2", 30)],
                next_cursor: Some("c1".to_string()),
            }),
            Ok(ContentPage {
                posts: vec![post("3", 60)],
                next_cursor: Some("c2".to_string()),
            }),
        ]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let posts = fetcher.fetch("a", 1, &CancelToken::new()).await.unwrap();
        // First page's oldest post (30h) predates the 1-day cutoff: stop.
        assert_eq!(api.call_count(), 1);
        // Posts older than the cutoff are trimmed.
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "1");
    }

    #[tokio::test]
    async fn follows_cursor_until_exhausted() {
        let api = ScriptedApi::new(vec![
            Ok(ContentPage {
                posts: vec![post("1", 1)],
                next_cursor: Some("c1".to_string()),
            }),
            Ok(ContentPage {
                posts: vec![post("2", 2)],
                next_cursor: None,
            }),
        ]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let posts = fetcher.fetch("a", 7, &CancelToken::new()).await.unwrap();
        assert_eq!(api.call_count(), 2);
        assert_eq!(posts.len(), 2);
    }

    #[tokio::test]
    async fn page_cap_bounds_malformed_pagination() {
        // Cursor never runs out; every post is fresh.
        let pages: Vec<content_client::Result<ContentPage>> = (0..50)
            .map(|i| {
                Ok(ContentPage {
                    posts: vec![post(&i.to_string(), 1)],
                    next_cursor: Some("again".to_string()),
                })
            })
            .collect();
        let api = ScriptedApi::new(pages);
        let cache = FetchCache::new();
        let settings = EngineSettings {
            fetch_page_cap: 3,
            ..fast_settings()
        };
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let posts = fetcher.fetch("a", 7, &CancelToken::new()).await.unwrap();
        assert_eq!(api.call_count(), 3);
        assert_eq!(posts.len(), 3);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let api = ScriptedApi::new(vec![
            Err(ContentError::Transient("connection reset".to_string())),
            Ok(ContentPage {
                posts: vec![post("1", 1)],
                next_cursor: None,
            }),
        ]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let posts = fetcher.fetch("a", 1, &CancelToken::new()).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn auth_error_not_retried() {
        let api = ScriptedApi::new(vec![Err(ContentError::Auth("bad key".to_string()))]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let err = fetcher.fetch("a", 1, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Auth(_)));
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn two_consecutive_soft_errors_abort_pagination() {
        let api = ScriptedApi::new(vec![
            Ok(ContentPage {
                posts: vec![post("1", 1)],
                next_cursor: Some("c1".to_string()),
            }),
            Err(ContentError::Soft("temporarily unavailable".to_string())),
            Err(ContentError::Soft("temporarily unavailable".to_string())),
            Ok(ContentPage {
                posts: vec![post("never", 1)],
                next_cursor: None,
            }),
        ]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let posts = fetcher.fetch("a", 1, &CancelToken::new()).await.unwrap();
        // Keeps what it gathered before aborting.
        assert_eq!(posts.len(), 1);
        assert_eq!(api.call_count(), 3);
    }

    #[tokio::test]
    async fn all_soft_errors_surface_as_fetch_failure() {
        // Every page refused: the account failed, it did not return an
        // empty window.
        let api = ScriptedApi::new(vec![
            Err(ContentError::Soft("account suspended".to_string())),
            Err(ContentError::Soft("account suspended".to_string())),
        ]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let err = fetcher.fetch("a", 1, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Transient(msg) if msg.contains("suspended")));
        assert_eq!(api.call_count(), 2);
        // The failure is not cached as an empty success either.
        assert!(cache.get("a", 1, settings.fetch_cache_ttl).is_none());
    }

    #[tokio::test]
    async fn cache_hit_bypasses_network() {
        let api = ScriptedApi::new(vec![Ok(ContentPage {
            posts: vec![post("1", 1)],
            next_cursor: None,
        })]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let cancel = CancelToken::new();
        let first = fetcher.fetch("a", 1, &cancel).await.unwrap();
        let second = fetcher.fetch("a", 1, &cancel).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn prefetch_swallows_errors() {
        let api = ScriptedApi::new(vec![Err(ContentError::Auth("bad key".to_string()))]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        // Must not panic or surface the auth error.
        fetcher
            .prefetch(&["a".to_string()], 1, &CancelToken::new())
            .await;
    }

    #[tokio::test]
    async fn cancelled_before_fetch() {
        let api = ScriptedApi::new(vec![]);
        let cache = FetchCache::new();
        let settings = fast_settings();
        let fetcher = ContentFetcher::new(&api, &cache, &settings);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = fetcher.fetch("a", 1, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(api.call_count(), 0);
    }
}

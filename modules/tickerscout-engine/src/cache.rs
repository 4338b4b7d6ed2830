use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tickerscout_common::{CacheEntry, Post, PromptFingerprint, Signal};

/// Local analysis cache: O(1) lookup by `fingerprint:post_url`, bounded,
/// evicted oldest-timestamp-first.
///
/// An entry with an empty signal list is meaningful — it records that a post
/// was analyzed and yielded nothing, so it is never re-inferred.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnalysisCache {
    entries: HashMap<String, CacheEntry>,
    bound: usize,
}

impl AnalysisCache {
    pub fn new(bound: usize) -> Self {
        Self {
            entries: HashMap::new(),
            bound,
        }
    }

    fn key(fingerprint: &PromptFingerprint, post_url: &str) -> String {
        format!("{fingerprint}:{post_url}")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, fingerprint: &PromptFingerprint, post_url: &str) -> Option<&CacheEntry> {
        self.entries.get(&Self::key(fingerprint, post_url))
    }

    pub fn insert(
        &mut self,
        fingerprint: &PromptFingerprint,
        post_url: &str,
        signals: Vec<Signal>,
        timestamp: DateTime<Utc>,
    ) {
        self.entries.insert(
            Self::key(fingerprint, post_url),
            CacheEntry { signals, timestamp },
        );
        self.evict_over_bound();
    }

    /// Split posts into (signals reused from cache, posts needing inference).
    /// Reused signals keep post order.
    pub fn split_cached(
        &self,
        posts: &[Post],
        fingerprint: &PromptFingerprint,
    ) -> (Vec<Signal>, Vec<Post>) {
        let mut cached = Vec::new();
        let mut misses = Vec::new();
        for post in posts {
            match self.get(fingerprint, &post.url) {
                Some(entry) => cached.extend(entry.signals.iter().cloned()),
                None => misses.push(post.clone()),
            }
        }
        (cached, misses)
    }

    fn evict_over_bound(&mut self) {
        if self.bound == 0 || self.entries.len() <= self.bound {
            return;
        }
        let excess = self.entries.len() - self.bound;
        let mut by_age: Vec<(String, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.timestamp))
            .collect();
        by_age.sort_by_key(|(_, ts)| *ts);
        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        debug!(evicted = excess, size = self.entries.len(), "Analysis cache evicted oldest entries");
    }

    /// Serialize for the persistence collaborator's analysis-cache blob.
    pub fn to_blob(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Restore from a persisted blob; a corrupt blob yields a fresh cache.
    pub fn from_blob(blob: &str, bound: usize) -> Self {
        match serde_json::from_str::<AnalysisCache>(blob) {
            Ok(mut cache) => {
                cache.bound = bound;
                cache.evict_over_bound();
                cache
            }
            Err(_) => Self::new(bound),
        }
    }
}

/// Cross-client cache tier shared via the backend. Advisory: at-least-once
/// computation, not exactly-once — racing clients may both analyze the same
/// content, and callers swallow errors from both operations.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// One batched lookup for all local misses under the fingerprint.
    async fn check(
        &self,
        fingerprint: &PromptFingerprint,
        post_urls: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<Signal>>>;

    /// Publish freshly computed entries for other clients to reuse.
    async fn publish(
        &self,
        fingerprint: &PromptFingerprint,
        entries: &HashMap<String, Vec<Signal>>,
    ) -> anyhow::Result<()>;
}

/// Consult the remote tier for local misses and backfill hits into the local
/// cache. Returns (reused signals, posts still needing inference). Errors are
/// logged and treated as a full miss.
pub async fn filter_remote(
    remote: &dyn RemoteCache,
    local: &mut AnalysisCache,
    fingerprint: &PromptFingerprint,
    posts: Vec<Post>,
) -> (Vec<Signal>, Vec<Post>) {
    if posts.is_empty() {
        return (Vec::new(), posts);
    }
    let urls: Vec<String> = posts.iter().map(|p| p.url.clone()).collect();
    let hits = match remote.check(fingerprint, &urls).await {
        Ok(hits) => hits,
        Err(e) => {
            info!(error = %e, "Remote cache check failed, treating as miss");
            return (Vec::new(), posts);
        }
    };

    let now = Utc::now();
    let mut reused = Vec::new();
    let mut misses = Vec::new();
    for post in posts {
        match hits.get(&post.url) {
            Some(signals) => {
                reused.extend(signals.iter().cloned());
                local.insert(fingerprint, &post.url, signals.clone(), now);
            }
            None => misses.push(post),
        }
    }
    (reused, misses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fp() -> PromptFingerprint {
        PromptFingerprint::compute("claude-sonnet-4-5", "prompt")
    }

    fn signal(title: &str, url: &str) -> Signal {
        Signal {
            title: title.to_string(),
            summary: "s".to_string(),
            category: "earnings".to_string(),
            source: "a".to_string(),
            tickers: vec![],
            post_url: Some(url.to_string()),
            links: vec![],
            post_time: None,
        }
    }

    fn post(url: &str) -> Post {
        Post {
            id: url.to_string(),
            text: "t".to_string(),
            created_at: Utc::now(),
            likes: 0,
            reposts: 0,
            replies: 0,
            url: url.to_string(),
            is_reply: false,
            reply_target: None,
            quoted_text: None,
            media_urls: vec![],
        }
    }

    #[test]
    fn split_partitions_hits_and_misses() {
        let mut cache = AnalysisCache::new(10);
        cache.insert(&fp(), "u1", vec![signal("a", "u1")], Utc::now());
        let posts = vec![post("u1"), post("u2")];
        let (cached, misses) = cache.split_cached(&posts, &fp());
        assert_eq!(cached.len(), 1);
        assert_eq!(misses.len(), 1);
        assert_eq!(misses[0].url, "u2");
    }

    #[test]
    fn empty_signal_entry_is_a_hit() {
        let mut cache = AnalysisCache::new(10);
        cache.insert(&fp(), "u1", vec![], Utc::now());
        let (cached, misses) = cache.split_cached(&[post("u1")], &fp());
        assert!(cached.is_empty());
        assert!(misses.is_empty());
    }

    #[test]
    fn fingerprint_change_makes_entries_unreachable() {
        let mut cache = AnalysisCache::new(10);
        cache.insert(&fp(), "u1", vec![signal("a", "u1")], Utc::now());
        let other = PromptFingerprint::compute("claude-sonnet-4-5", "different prompt");
        let (cached, misses) = cache.split_cached(&[post("u1")], &other);
        assert!(cached.is_empty());
        assert_eq!(misses.len(), 1);
    }

    #[test]
    fn eviction_removes_oldest_first() {
        let mut cache = AnalysisCache::new(2);
        let now = Utc::now();
        cache.insert(&fp(), "old", vec![], now - Duration::hours(3));
        cache.insert(&fp(), "mid", vec![], now - Duration::hours(1));
        cache.insert(&fp(), "new", vec![], now);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fp(), "old").is_none());
        assert!(cache.get(&fp(), "new").is_some());
    }

    #[test]
    fn blob_round_trip() {
        let mut cache = AnalysisCache::new(10);
        cache.insert(&fp(), "u1", vec![signal("a", "u1")], Utc::now());
        let blob = cache.to_blob();
        let restored = AnalysisCache::from_blob(&blob, 10);
        assert_eq!(restored.len(), 1);
        assert!(restored.get(&fp(), "u1").is_some());
    }

    #[test]
    fn corrupt_blob_yields_fresh_cache() {
        let restored = AnalysisCache::from_blob("not json{{", 10);
        assert!(restored.is_empty());
    }
}

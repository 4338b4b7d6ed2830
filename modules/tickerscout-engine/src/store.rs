use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tickerscout_common::{ScanResult, ScanSnapshot};

/// Client-side persistence: the current result, bounded history, the analysis
/// cache blob, and the in-flight snapshot for resume.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn current(&self) -> anyhow::Result<Option<ScanResult>>;
    async fn set_current(&self, result: &ScanResult) -> anyhow::Result<()>;

    async fn history(&self) -> anyhow::Result<Vec<ScanResult>>;
    async fn set_history(&self, history: &[ScanResult]) -> anyhow::Result<()>;

    /// Opaque serialized analysis cache; the store never looks inside.
    async fn cache_blob(&self) -> anyhow::Result<Option<String>>;
    async fn set_cache_blob(&self, blob: &str) -> anyhow::Result<()>;

    async fn snapshot(&self) -> anyhow::Result<Option<ScanSnapshot>>;
    async fn set_snapshot(&self, snapshot: Option<&ScanSnapshot>) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreDoc {
    #[serde(default)]
    current: Option<ScanResult>,
    #[serde(default)]
    history: Vec<ScanResult>,
    #[serde(default)]
    cache_blob: Option<String>,
    #[serde(default)]
    snapshot: Option<ScanSnapshot>,
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDoc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn current(&self) -> anyhow::Result<Option<ScanResult>> {
        Ok(self.doc.lock().expect("store poisoned").current.clone())
    }

    async fn set_current(&self, result: &ScanResult) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").current = Some(result.clone());
        Ok(())
    }

    async fn history(&self) -> anyhow::Result<Vec<ScanResult>> {
        Ok(self.doc.lock().expect("store poisoned").history.clone())
    }

    async fn set_history(&self, history: &[ScanResult]) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").history = history.to_vec();
        Ok(())
    }

    async fn cache_blob(&self) -> anyhow::Result<Option<String>> {
        Ok(self.doc.lock().expect("store poisoned").cache_blob.clone())
    }

    async fn set_cache_blob(&self, blob: &str) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").cache_blob = Some(blob.to_string());
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<Option<ScanSnapshot>> {
        Ok(self.doc.lock().expect("store poisoned").snapshot.clone())
    }

    async fn set_snapshot(&self, snapshot: Option<&ScanSnapshot>) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").snapshot = snapshot.cloned();
        Ok(())
    }
}

/// Single-file JSON store. The whole document is rewritten on every mutation
/// via a temp file and rename, so a crash mid-write never corrupts it.
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDoc>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Store file corrupt, starting fresh");
                    StoreDoc::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "No store file yet, starting fresh");
                StoreDoc::default()
            }
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let text = {
            let doc = self.doc.lock().expect("store poisoned");
            serde_json::to_string_pretty(&*doc).context("serialize store")?
        };
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &text)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for JsonFileStore {
    async fn current(&self) -> anyhow::Result<Option<ScanResult>> {
        Ok(self.doc.lock().expect("store poisoned").current.clone())
    }

    async fn set_current(&self, result: &ScanResult) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").current = Some(result.clone());
        self.flush().await
    }

    async fn history(&self) -> anyhow::Result<Vec<ScanResult>> {
        Ok(self.doc.lock().expect("store poisoned").history.clone())
    }

    async fn set_history(&self, history: &[ScanResult]) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").history = history.to_vec();
        self.flush().await
    }

    async fn cache_blob(&self) -> anyhow::Result<Option<String>> {
        Ok(self.doc.lock().expect("store poisoned").cache_blob.clone())
    }

    async fn set_cache_blob(&self, blob: &str) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").cache_blob = Some(blob.to_string());
        self.flush().await
    }

    async fn snapshot(&self) -> anyhow::Result<Option<ScanSnapshot>> {
        Ok(self.doc.lock().expect("store poisoned").snapshot.clone())
    }

    async fn set_snapshot(&self, snapshot: Option<&ScanSnapshot>) -> anyhow::Result<()> {
        self.doc.lock().expect("store poisoned").snapshot = snapshot.cloned();
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tickerscout_common::PromptFingerprint;
    use uuid::Uuid;

    fn result(total_posts: u32) -> ScanResult {
        ScanResult {
            id: Uuid::new_v4(),
            date: Utc::now(),
            window_days: 7,
            accounts: vec!["traderjane".to_string()],
            total_posts,
            signals: vec![],
            warnings: vec![],
            fingerprint: PromptFingerprint::compute("claude-sonnet-4-5", "p"),
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.set_current(&result(12)).await.unwrap();
        store.set_cache_blob("{\"entries\":{}}").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let current = reopened.current().await.unwrap().unwrap();
        assert_eq!(current.total_posts, 12);
        assert!(reopened.cache_blob().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{{{not json").await.unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_can_be_cleared() {
        let store = MemoryStore::new();
        let snap = ScanSnapshot {
            request: tickerscout_common::ScanRequest {
                accounts: vec!["a".to_string()],
                window_days: 7,
            },
            account_results: vec![],
            fingerprint: PromptFingerprint::compute("m", "p"),
            taken_at: Utc::now(),
        };
        store.set_snapshot(Some(&snap)).await.unwrap();
        assert!(store.snapshot().await.unwrap().is_some());
        store.set_snapshot(None).await.unwrap();
        assert!(store.snapshot().await.unwrap().is_none());
    }
}

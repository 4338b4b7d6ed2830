use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use content_client::ContentApi;
use inference_client::Completer;
use tickerscout_common::{
    AccountResult, CancelToken, EngineSettings, ModelProfile, PromptFingerprint, ScanError,
    ScanEvent, ScanPhase, ScanRequest, ScanResult, ScanSnapshot, Signal,
};

use crate::analyzer::{Analyzer, ANALYST_SYSTEM_PROMPT};
use crate::backend::ScanBackend;
use crate::batcher::build_batches;
use crate::cache::{filter_remote, AnalysisCache, RemoteCache};
use crate::fetcher::{ContentFetcher, FetchCache};
use crate::normalizer::normalize;
use crate::scheduler::run_all;
use crate::store::SignalStore;

/// The scan orchestrator: fetch, cache-filter, batch, infer, merge, persist.
///
/// Holds no per-scan state of its own; everything mutable lives behind the
/// injected store and the two caches, so one engine can serve scans
/// sequentially and a crash loses nothing but the in-flight work (and even
/// that is recoverable through the snapshot).
pub struct ScanEngine {
    content: Arc<dyn ContentApi>,
    completer: Arc<dyn Completer>,
    backend: Arc<dyn ScanBackend>,
    remote_cache: Arc<dyn RemoteCache>,
    store: Arc<dyn SignalStore>,
    fetch_cache: FetchCache,
    analysis_cache: Mutex<AnalysisCache>,
    settings: EngineSettings,
    model: ModelProfile,
    prompt: String,
    fingerprint: PromptFingerprint,
}

impl ScanEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: Arc<dyn ContentApi>,
        completer: Arc<dyn Completer>,
        backend: Arc<dyn ScanBackend>,
        remote_cache: Arc<dyn RemoteCache>,
        store: Arc<dyn SignalStore>,
        settings: EngineSettings,
        model: ModelProfile,
        prompt_override: Option<String>,
    ) -> Self {
        let prompt = prompt_override.unwrap_or_else(|| ANALYST_SYSTEM_PROMPT.to_string());
        let fingerprint = PromptFingerprint::compute(&model.id, &prompt);
        let analysis_cache = Mutex::new(AnalysisCache::new(settings.local_cache_bound));
        Self {
            content,
            completer,
            backend,
            remote_cache,
            store,
            fetch_cache: FetchCache::new(),
            analysis_cache,
            settings,
            model,
            prompt,
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> &PromptFingerprint {
        &self.fingerprint
    }

    /// Restore the analysis cache from the store's persisted blob.
    pub async fn hydrate_cache(&self) -> anyhow::Result<()> {
        if let Some(blob) = self.store.cache_blob().await? {
            let restored = AnalysisCache::from_blob(&blob, self.settings.local_cache_bound);
            info!(entries = restored.len(), "Analysis cache hydrated from store");
            *self.analysis_cache.lock().await = restored;
        }
        Ok(())
    }

    /// Warm the fetch cache for an upcoming scan. Best-effort.
    pub async fn prefetch(&self, accounts: &[String], window_days: u32, cancel: &CancelToken) {
        let fetcher = ContentFetcher::new(self.content.as_ref(), &self.fetch_cache, &self.settings);
        fetcher.prefetch(accounts, window_days, cancel).await;
    }

    /// Run a full scan. Progress events stream to `events`; the final result
    /// comes back here and is persisted to the store before returning.
    pub async fn scan(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        events: Option<&UnboundedSender<ScanEvent>>,
    ) -> Result<ScanResult, ScanError> {
        let started = Instant::now();

        // Someone may have run this exact scan moments ago.
        emit_phase(events, ScanPhase::ShortcutCheck);
        match self.backend.lookup_recent(request, &self.fingerprint).await {
            Ok(Some(result)) => {
                info!(signals = result.signals.len(), "Reusing recent scan from backend");
                emit(events, ScanEvent::Status {
                    message: "Reusing a recent identical scan".to_string(),
                });
                self.persist_result(&result).await?;
                emit_phase(events, ScanPhase::Persisted);
                return Ok(result);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Shortcut lookup failed, scanning from scratch"),
        }

        emit_phase(events, ScanPhase::Fetching);
        let account_results = self.fetch_accounts(request, cancel, events).await?;
        let total_posts: usize = account_results.iter().map(|r| r.posts.len()).sum();
        if total_posts == 0 {
            return Err(ScanError::NoContent);
        }

        // Persist fetched content before spending inference on it, so an
        // interrupted scan can resume without refetching.
        let snapshot = ScanSnapshot {
            request: request.clone(),
            account_results: account_results.clone(),
            fingerprint: self.fingerprint.clone(),
            taken_at: Utc::now(),
        };
        if let Err(e) = self.store.set_snapshot(Some(&snapshot)).await {
            warn!(error = %e, "Snapshot persist failed, resume will not be possible");
        }

        let outcome = self
            .run_pipeline(request, account_results, started, cancel, events)
            .await;
        if matches!(outcome, Err(ScanError::Cancelled)) {
            // A cancelled scan is a deliberate stop; keeping the snapshot
            // would resurrect it on the next launch.
            let _ = self.store.set_snapshot(None).await;
        }
        outcome
    }

    /// Resume an interrupted scan from the persisted snapshot, if one exists
    /// and was taken under the current model and prompt.
    pub async fn resume(
        &self,
        cancel: &CancelToken,
        events: Option<&UnboundedSender<ScanEvent>>,
    ) -> Result<Option<ScanResult>, ScanError> {
        let Some(snapshot) = self
            .store
            .snapshot()
            .await
            .map_err(|e| ScanError::Store(e.to_string()))?
        else {
            return Ok(None);
        };
        if snapshot.fingerprint != self.fingerprint {
            info!("Snapshot taken under a different model or prompt, discarding");
            let _ = self.store.set_snapshot(None).await;
            return Ok(None);
        }

        emit(events, ScanEvent::Status {
            message: "Resuming interrupted scan".to_string(),
        });
        let request = snapshot.request.clone();
        let outcome = self
            .run_pipeline(&request, snapshot.account_results, Instant::now(), cancel, events)
            .await;
        match outcome {
            Ok(result) => Ok(Some(result)),
            Err(ScanError::Cancelled) => {
                let _ = self.store.set_snapshot(None).await;
                Err(ScanError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_accounts(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        events: Option<&UnboundedSender<ScanEvent>>,
    ) -> Result<Vec<AccountResult>, ScanError> {
        let fetcher = ContentFetcher::new(self.content.as_ref(), &self.fetch_cache, &self.settings);
        let results: Vec<AccountResult> = futures::stream::iter(request.accounts.iter().map(|account| {
            let fetcher = &fetcher;
            async move {
                match fetcher.fetch(account, request.window_days, cancel).await {
                    Ok(posts) => Ok(AccountResult {
                        account: account.clone(),
                        posts,
                        error: None,
                    }),
                    // Bad credentials fail every account; surface once.
                    Err(e @ (ScanError::Cancelled | ScanError::Auth(_))) => Err(e),
                    Err(e) => Ok(AccountResult {
                        account: account.clone(),
                        posts: Vec::new(),
                        error: Some(e.to_string()),
                    }),
                }
            }
        }))
        .buffered(self.settings.fetch_concurrency)
        .try_collect()
        .await?;

        for result in &results {
            if let Some(error) = &result.error {
                emit(events, ScanEvent::Warning {
                    message: format!("@{}: {error}", result.account),
                });
            }
        }
        Ok(results)
    }

    /// Everything after fetch: cache tiers, batching, inference, merge,
    /// persistence. Shared by `scan` and `resume`.
    async fn run_pipeline(
        &self,
        request: &ScanRequest,
        account_results: Vec<AccountResult>,
        started: Instant,
        cancel: &CancelToken,
        events: Option<&UnboundedSender<ScanEvent>>,
    ) -> Result<ScanResult, ScanError> {
        let total_posts: usize = account_results.iter().map(|r| r.posts.len()).sum();
        let all_posts: Vec<_> = account_results
            .iter()
            .flat_map(|r| r.posts.iter().cloned())
            .collect();

        emit_phase(events, ScanPhase::CacheLocal);
        let (local_signals, misses) = self
            .analysis_cache
            .lock()
            .await
            .split_cached(&all_posts, &self.fingerprint);

        emit_phase(events, ScanPhase::CacheRemote);
        let (remote_signals, misses) = {
            let mut cache = self.analysis_cache.lock().await;
            filter_remote(
                self.remote_cache.as_ref(),
                &mut cache,
                &self.fingerprint,
                misses,
            )
            .await
        };

        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        emit_phase(events, ScanPhase::Analyzing);
        let miss_urls: HashSet<&str> = misses.iter().map(|p| p.url.as_str()).collect();
        let to_analyze: Vec<AccountResult> = account_results
            .iter()
            .map(|r| AccountResult {
                account: r.account.clone(),
                posts: r
                    .posts
                    .iter()
                    .filter(|p| miss_urls.contains(p.url.as_str()))
                    .cloned()
                    .collect(),
                error: r.error.clone(),
            })
            .collect();
        let batches = build_batches(&to_analyze, self.prompt.len(), &self.settings);
        let batch_count = batches.len();

        let analyzer = Analyzer::new(
            self.completer.as_ref(),
            &self.settings,
            &self.model,
            &self.prompt,
        );
        let fresh_entries: Mutex<HashMap<String, Vec<Signal>>> = Mutex::new(HashMap::new());
        let fresh_signals = run_all(
            batches,
            self.settings.concurrency_for(&self.model),
            cancel,
            |_, batch| {
                let analyzer = &analyzer;
                let fresh_entries = &fresh_entries;
                async move {
                    let analysis = analyzer.analyze_batch(&batch, events, cancel).await?;
                    let now = Utc::now();
                    {
                        let mut cache = self.analysis_cache.lock().await;
                        for (url, signals) in &analysis.entries {
                            cache.insert(&self.fingerprint, url, signals.clone(), now);
                        }
                    }
                    fresh_entries.lock().await.extend(analysis.entries);
                    Ok(analysis.signals)
                }
            },
        )
        .await?;

        emit_phase(events, ScanPhase::Merging);
        let fresh_count = fresh_signals.len();
        let mut combined = local_signals;
        let cached_local = combined.len();
        let cached_remote = remote_signals.len();
        combined.extend(remote_signals);
        combined.extend(fresh_signals);
        let signals = normalize(combined);

        let warnings: Vec<String> = account_results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("@{}: {e}", r.account)))
            .collect();
        let result = ScanResult {
            id: Uuid::new_v4(),
            date: Utc::now(),
            window_days: request.window_days,
            accounts: request.accounts.clone(),
            total_posts: total_posts as u32,
            signals,
            warnings,
            fingerprint: self.fingerprint.clone(),
        };

        self.persist_result(&result).await?;
        let _ = self.store.set_snapshot(None).await;

        let fresh_entries = fresh_entries.into_inner();
        if !fresh_entries.is_empty() {
            if let Err(e) = self
                .remote_cache
                .publish(&self.fingerprint, &fresh_entries)
                .await
            {
                warn!(error = %e, "Remote cache publish failed, ignoring");
            }
        }
        if let Err(e) = self.backend.persist(&result).await {
            warn!(error = %e, "Backend scan persist failed, ignoring");
        }

        emit_phase(events, ScanPhase::Persisted);
        let stats = ScanStats {
            accounts: request.accounts.len(),
            total_posts,
            cached_local,
            cached_remote,
            batches: batch_count,
            fresh_signals: fresh_count,
            final_signals: result.signals.len(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!("{stats}");
        Ok(result)
    }

    /// Store the result as current, fold it into bounded history, and persist
    /// the analysis cache blob. Store failures here are real failures; the
    /// user would otherwise see a scan succeed and then vanish.
    async fn persist_result(&self, result: &ScanResult) -> Result<(), ScanError> {
        self.store
            .set_current(result)
            .await
            .map_err(|e| ScanError::Store(e.to_string()))?;

        let mut history = self
            .store
            .history()
            .await
            .map_err(|e| ScanError::Store(e.to_string()))?;
        let collapse = history.last().is_some_and(|last| {
            last.accounts == result.accounts
                && last.window_days == result.window_days
                && (result.date - last.date).to_std().ok()
                    .is_some_and(|age| age < self.settings.history_collapse_window)
        });
        if collapse {
            let last = history.len() - 1;
            history[last] = result.clone();
        } else {
            history.push(result.clone());
        }
        if history.len() > self.settings.history_bound {
            let drop = history.len() - self.settings.history_bound;
            history.drain(..drop);
        }
        self.store
            .set_history(&history)
            .await
            .map_err(|e| ScanError::Store(e.to_string()))?;

        let blob = self.analysis_cache.lock().await.to_blob();
        self.store
            .set_cache_blob(&blob)
            .await
            .map_err(|e| ScanError::Store(e.to_string()))?;
        Ok(())
    }
}

struct ScanStats {
    accounts: usize,
    total_posts: usize,
    cached_local: usize,
    cached_remote: usize,
    batches: usize,
    fresh_signals: usize,
    final_signals: usize,
    elapsed_secs: f64,
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scan complete: {} accounts, {} posts, {} cached locally, {} from remote cache, \
             {} batches inferred ({} fresh signals), {} signals after merge, {:.1}s",
            self.accounts,
            self.total_posts,
            self.cached_local,
            self.cached_remote,
            self.batches,
            self.fresh_signals,
            self.final_signals,
            self.elapsed_secs,
        )
    }
}

fn emit(events: Option<&UnboundedSender<ScanEvent>>, event: ScanEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}

fn emit_phase(events: Option<&UnboundedSender<ScanEvent>>, phase: ScanPhase) {
    emit(events, ScanEvent::Phase { phase });
}

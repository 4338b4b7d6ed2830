use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use content_client::ApiEnvelope;
use tickerscout_common::{PromptFingerprint, ScanRequest, ScanResult, Signal};

use crate::cache::RemoteCache;

/// Backend operations around a scan: the recent-result shortcut and result
/// persistence. Both are best-effort from the orchestrator's point of view.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Ask whether another client already ran this exact request (same
    /// accounts, window, and fingerprint) recently enough to reuse.
    async fn lookup_recent(
        &self,
        request: &ScanRequest,
        fingerprint: &PromptFingerprint,
    ) -> anyhow::Result<Option<ScanResult>>;

    async fn persist(&self, result: &ScanResult) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    accounts: &'a [String],
    window_days: u32,
    fingerprint: &'a PromptFingerprint,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    result: Option<ScanResult>,
}

#[derive(Serialize)]
struct CacheCheckRequest<'a> {
    fingerprint: &'a PromptFingerprint,
    post_urls: &'a [String],
}

#[derive(Deserialize)]
struct CacheCheckResponse {
    #[serde(default)]
    hits: HashMap<String, Vec<Signal>>,
}

#[derive(Serialize)]
struct CachePublishRequest<'a> {
    fingerprint: &'a PromptFingerprint,
    entries: &'a HashMap<String, Vec<Signal>>,
}

/// HTTP client for the tickerscout backend. One client serves both the scan
/// endpoints and the cross-client cache tier.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{path} returned {status}: {text}"));
        }

        let envelope: ApiEnvelope<T> = resp.json().await.with_context(|| format!("decode {path}"))?;
        match envelope {
            ApiEnvelope::Ok { data } => Ok(data),
            ApiEnvelope::Error { message } => Err(anyhow!("{path} error: {message}")),
        }
    }
}

#[async_trait]
impl ScanBackend for BackendClient {
    async fn lookup_recent(
        &self,
        request: &ScanRequest,
        fingerprint: &PromptFingerprint,
    ) -> anyhow::Result<Option<ScanResult>> {
        let body = LookupRequest {
            accounts: &request.accounts,
            window_days: request.window_days,
            fingerprint,
        };
        let resp: LookupResponse = self.post("/v1/scans/lookup", &body).await?;
        debug!(hit = resp.result.is_some(), "Scan shortcut lookup");
        Ok(resp.result)
    }

    async fn persist(&self, result: &ScanResult) -> anyhow::Result<()> {
        let _: serde_json::Value = self.post("/v1/scans", result).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteCache for BackendClient {
    async fn check(
        &self,
        fingerprint: &PromptFingerprint,
        post_urls: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<Signal>>> {
        let body = CacheCheckRequest {
            fingerprint,
            post_urls,
        };
        let resp: CacheCheckResponse = self.post("/v1/cache/check", &body).await?;
        debug!(
            asked = post_urls.len(),
            hits = resp.hits.len(),
            "Remote cache check"
        );
        Ok(resp.hits)
    }

    async fn publish(
        &self,
        fingerprint: &PromptFingerprint,
        entries: &HashMap<String, Vec<Signal>>,
    ) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let body = CachePublishRequest {
            fingerprint,
            entries,
        };
        let _: serde_json::Value = self.post("/v1/cache/publish", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_response_tolerates_missing_result() {
        let resp: LookupResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.result.is_none());
    }

    #[test]
    fn cache_check_response_parses_hits() {
        let json = r#"{"hits": {"https://x.com/a/status/1": []}}"#;
        let resp: CacheCheckResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.hits.len(), 1);
    }
}

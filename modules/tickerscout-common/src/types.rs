use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::PromptFingerprint;

// --- Content types ---

/// A single social post as returned by the content API. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub reposts: u32,
    #[serde(default)]
    pub replies: u32,
    pub url: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub reply_target: Option<String>,
    /// Text of a quoted post, when this post quotes another.
    #[serde(default)]
    pub quoted_text: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

/// One fetched account: its posts, or the error that prevented fetching them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResult {
    pub account: String,
    pub posts: Vec<Post>,
    #[serde(default)]
    pub error: Option<String>,
}

// --- Batch ---

/// A packed unit of work for one inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub text: String,
    pub image_urls: Vec<String>,
    pub post_urls: Vec<String>,
    pub accounts: Vec<String>,
    pub size_chars: usize,
}

// --- Signal types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerAction {
    Buy,
    Sell,
    Hold,
    Watch,
    Mixed,
}

impl std::fmt::Display for TickerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickerAction::Buy => write!(f, "buy"),
            TickerAction::Sell => write!(f, "sell"),
            TickerAction::Hold => write!(f, "hold"),
            TickerAction::Watch => write!(f, "watch"),
            TickerAction::Mixed => write!(f, "mixed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMention {
    pub symbol: String,
    pub action: TickerAction,
}

/// A structured trading-relevant observation extracted from a post.
/// Produced only by the parser/normalizer; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub category: String,
    /// Account the signal came from, as reported by the model.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub tickers: Vec<TickerMention>,
    #[serde(default)]
    pub post_url: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub post_time: Option<DateTime<Utc>>,
}

// --- Cache types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub signals: Vec<Signal>,
    pub timestamp: DateTime<Utc>,
}

// --- Scan types ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub accounts: Vec<String>,
    pub window_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub window_days: u32,
    pub accounts: Vec<String>,
    pub total_posts: u32,
    pub signals: Vec<Signal>,
    /// Per-account fetch failures that did not abort the scan.
    #[serde(default)]
    pub warnings: Vec<String>,
    pub fingerprint: PromptFingerprint,
}

/// Fetched-but-unanalyzed content, persisted before analysis so an
/// interrupted scan can be resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub request: ScanRequest,
    pub account_results: Vec<AccountResult>,
    pub fingerprint: PromptFingerprint,
    pub taken_at: DateTime<Utc>,
}

// --- Progress events ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    ShortcutCheck,
    Fetching,
    CacheLocal,
    CacheRemote,
    Analyzing,
    Merging,
    Persisted,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanPhase::Idle => write!(f, "idle"),
            ScanPhase::ShortcutCheck => write!(f, "shortcut_check"),
            ScanPhase::Fetching => write!(f, "fetching"),
            ScanPhase::CacheLocal => write!(f, "cache_local"),
            ScanPhase::CacheRemote => write!(f, "cache_remote"),
            ScanPhase::Analyzing => write!(f, "analyzing"),
            ScanPhase::Merging => write!(f, "merging"),
            ScanPhase::Persisted => write!(f, "persisted"),
        }
    }
}

/// Events surfaced to the caller while a scan runs. Decoupled from the
/// scan's return value; consumers read them off an unbounded channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Phase { phase: ScanPhase },
    Inference { elapsed_ms: u64, output_tokens: u32 },
    Status { message: String },
    Warning { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_action_round_trips_snake_case() {
        let json = serde_json::to_string(&TickerAction::Watch).unwrap();
        assert_eq!(json, "\"watch\"");
        let back: TickerAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TickerAction::Watch);
    }

    #[test]
    fn post_deserializes_with_missing_optionals() {
        let json = r#"{
            "id": "1",
            "text": "NVDA earnings beat",
            "created_at": "2026-08-25T14:00:00Z",
            "url": "https://x.com/a/status/1"
        }"#;
        let post: Post = serde_json::from_str(json).unwrap();
        assert_eq!(post.likes, 0);
        assert!(post.media_urls.is_empty());
        assert!(!post.is_reply);
    }

    #[test]
    fn scan_event_tagged_serialization() {
        let ev = ScanEvent::Inference {
            elapsed_ms: 1200,
            output_tokens: 40,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "inference");
        assert_eq!(json["output_tokens"], 40);
    }
}

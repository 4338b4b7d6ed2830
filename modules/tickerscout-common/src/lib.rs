pub mod cancel;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod types;

pub use cancel::CancelToken;
pub use config::{Config, EngineSettings, ModelProfile};
pub use error::ScanError;
pub use fingerprint::PromptFingerprint;
pub use types::{
    AccountResult, Batch, CacheEntry, Post, ScanEvent, ScanPhase, ScanRequest, ScanResult,
    ScanSnapshot, Signal, TickerAction, TickerMention,
};

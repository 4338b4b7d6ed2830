use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable hash of (model id, active prompt text) — the cache partition key.
///
/// Any change to the analyst prompt or the model invalidates every prior
/// cache entry by construction: new lookups simply miss. Correctness over
/// reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptFingerprint(String);

impl PromptFingerprint {
    pub fn compute(model_id: &str, prompt_text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(prompt_text.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PromptFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

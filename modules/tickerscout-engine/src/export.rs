use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tickerscout_common::ScanResult;

const EXPORT_VERSION: u32 = 1;

/// Versioned wrapper for shareable scan results. The version gate lets a
/// future format change reject old payloads with a clear message instead of
/// a deserialization error.
#[derive(Debug, Serialize, Deserialize)]
struct ExportEnvelope {
    version: u32,
    exported_at: DateTime<Utc>,
    result: ScanResult,
}

/// Encode a scan result as a compact shareable string.
pub fn export_result(result: &ScanResult) -> anyhow::Result<String> {
    let envelope = ExportEnvelope {
        version: EXPORT_VERSION,
        exported_at: Utc::now(),
        result: result.clone(),
    };
    let json = serde_json::to_vec(&envelope).context("serialize export")?;
    Ok(STANDARD.encode(json))
}

/// Decode a shared scan result, rejecting unknown versions.
pub fn import_result(encoded: &str) -> anyhow::Result<ScanResult> {
    let json = STANDARD
        .decode(encoded.trim())
        .context("payload is not valid base64")?;
    let envelope: ExportEnvelope =
        serde_json::from_slice(&json).context("payload is not a scan export")?;
    if envelope.version != EXPORT_VERSION {
        return Err(anyhow!(
            "unsupported export version {} (expected {EXPORT_VERSION})",
            envelope.version
        ));
    }
    Ok(envelope.result)
}

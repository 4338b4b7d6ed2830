use std::time::Duration;

use serde::{Deserialize, Serialize};

// --- Public request/response types ---

/// A single streamed completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user_text: String,
    /// Image URLs attached to the user turn (vision input).
    pub image_urls: Vec<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Final accumulated output of a streamed completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub output_tokens: u32,
}

/// Incremental progress surfaced while the response streams in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InferenceProgress {
    pub elapsed_ms: u64,
    pub output_tokens: u32,
}

// --- Wire types ---

#[derive(Debug, Serialize)]
pub struct WireRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: &'static str,
    pub url: String,
}

impl WireRequest {
    pub fn from_completion(req: &CompletionRequest) -> Self {
        let mut content = Vec::with_capacity(1 + req.image_urls.len());
        for url in &req.image_urls {
            content.push(ContentPart::Image {
                source: ImageSource {
                    source_type: "url",
                    url: url.clone(),
                },
            });
        }
        content.push(ContentPart::Text {
            text: req.user_text.clone(),
        });
        Self {
            model: req.model.clone(),
            max_tokens: req.max_tokens,
            system: req.system.clone(),
            messages: vec![WireMessage {
                role: "user",
                content,
            }],
            stream: true,
            temperature: 0.0,
        }
    }
}

/// Incremental events on the stream. Unknown event types deserialize to
/// `Other` and are skipped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: Option<serde_json::Value>,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop {},
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub output_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct StreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

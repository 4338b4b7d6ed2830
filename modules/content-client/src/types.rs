use serde::{Deserialize, Serialize};

use tickerscout_common::Post;

/// One page of an account's posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPage {
    pub posts: Vec<Post>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PageRequest<'a> {
    pub account: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<&'a str>,
    pub page_size: u32,
}

/// The backend returns loosely-shaped JSON; model it as a tagged result at
/// the boundary instead of probing fields downstream.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiEnvelope<T> {
    Ok { data: T },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_ok_variant() {
        let json = r#"{
            "status": "ok",
            "data": {
                "posts": [{
                    "id": "9",
                    "text": "TSLA deliveries up",
                    "created_at": "2026-08-25T09:00:00Z",
                    "url": "https://x.com/a/status/9"
                }],
                "next_cursor": "abc"
            }
        }"#;
        let env: ApiEnvelope<ContentPage> = serde_json::from_str(json).unwrap();
        match env {
            ApiEnvelope::Ok { data } => {
                assert_eq!(data.posts.len(), 1);
                assert_eq!(data.next_cursor.as_deref(), Some("abc"));
            }
            ApiEnvelope::Error { .. } => panic!("expected ok envelope"),
        }
    }

    #[test]
    fn envelope_parses_soft_error() {
        let json = r#"{"status": "error", "message": "account suspended"}"#;
        let env: ApiEnvelope<ContentPage> = serde_json::from_str(json).unwrap();
        assert!(matches!(env, ApiEnvelope::Error { message } if message == "account suspended"));
    }

    #[test]
    fn page_request_omits_missing_cursor() {
        let req = PageRequest {
            account: "traderjane",
            cursor: None,
            page_size: 50,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("cursor").is_none());
    }
}

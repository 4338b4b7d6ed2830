pub mod error;
pub mod types;

pub use error::{ContentError, Result};
pub use types::{ApiEnvelope, ContentPage, PageRequest};

use async_trait::async_trait;

/// Seam between the fetcher and the backend content API. The engine's tests
/// substitute scripted implementations.
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn fetch_page(
        &self,
        account: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<ContentPage>;
}

pub struct HttpContentApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpContentApi {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ContentApi for HttpContentApi {
    async fn fetch_page(
        &self,
        account: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<ContentPage> {
        let url = format!("{}/v1/content/fetch", self.base_url);
        let body = PageRequest {
            account,
            cursor,
            page_size,
        };

        tracing::debug!(account, cursor = cursor.unwrap_or("-"), "Fetching content page");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ContentError::Auth(text),
                429 => ContentError::RateLimited(text),
                _ => ContentError::Transient(format!("status {status}: {text}")),
            });
        }

        let envelope: ApiEnvelope<ContentPage> = resp.json().await?;
        match envelope {
            ApiEnvelope::Ok { data } => {
                tracing::debug!(
                    account,
                    posts = data.posts.len(),
                    has_next = data.next_cursor.is_some(),
                    "Content page fetched"
                );
                Ok(data)
            }
            ApiEnvelope::Error { message } => Err(ContentError::Soft(message)),
        }
    }
}

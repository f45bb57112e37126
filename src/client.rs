//! Entry Source Adapter: the aggregator's remote API consumed over HTTP.
//!
//! Holds no durable local state. Every mutation here writes through to the
//! aggregator, which remains the sole source of truth for entry content.

use crate::types::{EnricherError, Entry, EntryPage, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Remote entry store: paginated unread fetch, content update, and a create
/// path used for publishing digests.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Fetch one page of unread entries starting at `cursor`. Returns the
    /// page plus the next cursor, or `None` when this was the last page.
    async fn fetch_unread(&self, cursor: u64, page_size: usize) -> Result<EntryPage>;

    /// Re-read a single entry's current persisted state.
    async fn fetch_entry(&self, entry_id: i64) -> Result<Entry>;

    /// Replace an entry's content field.
    async fn update_content(&self, entry_id: i64, content: &str) -> Result<()>;

    /// Create a new entry (digest publishing). Never updates an existing one.
    async fn create_entry(&self, title: &str, content: &str) -> Result<i64>;
}

/// Aggregator client configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// HTTP client for a Miniflux-compatible aggregator API.
pub struct MinifluxClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct EntriesResponse {
    total: u64,
    #[serde(default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Serialize)]
struct UpdateEntryRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateEntryRequest<'a> {
    title: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateEntryResponse {
    id: i64,
}

impl MinifluxClient {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                let mut value = reqwest::header::HeaderValue::from_str(&config.api_key)
                    .map_err(|_| EnricherError::Config("API key contains invalid characters".into()))?;
                value.set_sensitive(true);
                headers.insert("X-Auth-Token", value);
                headers
            })
            .build()?;

        // Treat the base as a directory so joins keep its trailing segment.
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(EnricherError::InvalidUrl)
    }

    /// Map transport and status failures onto the error taxonomy so the
    /// retry policy can classify them.
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(EnricherError::Auth(
                format!("aggregator rejected credentials (HTTP {})", status.as_u16()),
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                Err(EnricherError::RateLimited { retry_after_secs })
            }
            s if s.is_server_error() => Err(EnricherError::Server {
                status: s.as_u16(),
            }),
            s => Err(EnricherError::General(format!(
                "aggregator returned HTTP {}",
                s.as_u16()
            ))),
        }
    }

    fn map_send_error(e: reqwest::Error) -> EnricherError {
        if e.is_timeout() {
            EnricherError::Timeout
        } else {
            EnricherError::Http(e)
        }
    }
}

#[async_trait]
impl EntryStore for MinifluxClient {
    async fn fetch_unread(&self, cursor: u64, page_size: usize) -> Result<EntryPage> {
        let mut url = self.endpoint("v1/entries")?;
        url.query_pairs_mut()
            .append_pair("status", "unread")
            .append_pair("order", "id")
            .append_pair("direction", "desc")
            .append_pair("offset", &cursor.to_string())
            .append_pair("limit", &page_size.to_string());

        debug!(cursor, page_size, "fetching unread entries page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body: EntriesResponse = self.check(response).await?.json().await?;

        let fetched = body.entries.len() as u64;
        let next_cursor = if fetched > 0 && cursor + fetched < body.total {
            Some(cursor + fetched)
        } else {
            None
        };

        debug!(fetched, total = body.total, ?next_cursor, "page fetched");
        Ok(EntryPage {
            entries: body.entries,
            next_cursor,
        })
    }

    async fn fetch_entry(&self, entry_id: i64) -> Result<Entry> {
        let url = self.endpoint(&format!("v1/entries/{entry_id}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn update_content(&self, entry_id: i64, content: &str) -> Result<()> {
        let url = self.endpoint(&format!("v1/entries/{entry_id}"))?;
        let response = self
            .client
            .put(url)
            .json(&UpdateEntryRequest { content })
            .send()
            .await
            .map_err(Self::map_send_error)?;
        self.check(response).await?;
        debug!(entry_id, "entry content updated");
        Ok(())
    }

    async fn create_entry(&self, title: &str, content: &str) -> Result<i64> {
        let url = self.endpoint("v1/entries")?;
        let response = self
            .client
            .post(url)
            .json(&CreateEntryRequest { title, content })
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let created: CreateEntryResponse = self.check(response).await?.json().await?;
        info!(entry_id = created.id, title, "published new entry");
        Ok(created.id)
    }
}

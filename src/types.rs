use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A feed category as exposed by the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

/// Read-only feed metadata attached to entries by the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub site_url: String,
    #[serde(default)]
    pub category: Option<Category>,
}

/// A single article from a subscribed feed. Owned by the aggregator;
/// this service only ever appends marker blocks to `content`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    #[serde(default)]
    pub feed_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub feed: Option<Feed>,
}

impl Entry {
    /// Feed metadata, or an empty placeholder when the aggregator
    /// omitted the nested feed object.
    pub fn feed(&self) -> Feed {
        self.feed.clone().unwrap_or_default()
    }
}

/// One page of unread entries plus the cursor for the next page, if any.
#[derive(Debug, Clone)]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    pub next_cursor: Option<u64>,
}

/// Why a (entry, agent) work item did not produce a marker block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The agent's rules rejected the entry. No external call was made.
    Rejected,
    /// A marker with a matching source hash already exists.
    UpToDate,
    /// The entry had no source content to work with.
    EmptyContent,
}

/// A single failed (entry, agent) work item, collected into the sweep report.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub entry_id: i64,
    pub agent: String,
    pub error: String,
}

/// End-of-sweep summary. Per-item failures are isolated here instead of
/// aborting sibling work.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub entries_seen: usize,
    pub items_processed: usize,
    pub items_skipped: usize,
    pub items_deferred: usize,
    pub failures: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl SweepReport {
    pub fn items_failed(&self) -> usize {
        self.failures.len()
    }
}

/// An entry successfully processed by an agent, retained in memory so the
/// digest engine can collect it later. Losing this cache only costs the next
/// digest some inputs; the aggregator's stored content stays authoritative.
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub entry_id: i64,
    pub agent: String,
    pub title: String,
    pub url: String,
    pub feed_title: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnricherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid rule '{rule}': {reason}")]
    Rule { rule: String, reason: String },

    #[error("content conflict for entry {entry_id}: {reason}")]
    Conflict { entry_id: i64, reason: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("digest run failed during {stage}: {reason}")]
    Digest { stage: &'static str, reason: String },

    #[error("{0}")]
    General(String),
}

impl EnricherError {
    /// Whether retrying the failed call could ever succeed. Authentication
    /// and validation failures are terminal for the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            EnricherError::Timeout
            | EnricherError::Server { .. }
            | EnricherError::RateLimited { .. } => true,
            EnricherError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EnricherError>;

//! Digest engine: clusters and deduplicates recently processed entries into
//! a periodic briefing with citation backlinks, published as a new entry.
//!
//! A run moves Idle -> Collecting -> Clustering -> Rendering -> Published ->
//! Idle. Failure while collecting or clustering aborts the run for the next
//! scheduled tick; failure while rendering or publishing is retried a
//! bounded number of times before surfacing as a terminal run failure.

use crate::client::EntryStore;
use crate::content;
use crate::retry::RetryPolicy;
use crate::sweep::ProcessedLog;
use crate::types::{EnricherError, ProcessedRecord, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Digest run state, exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestState {
    Idle,
    Collecting,
    Clustering,
    Rendering,
    Published,
}

/// One candidate story with its pre-tokenized text.
#[derive(Debug, Clone)]
pub struct DigestSource {
    pub record: ProcessedRecord,
    pub tokens: HashSet<String>,
}

impl DigestSource {
    fn new(record: ProcessedRecord) -> Self {
        let mut tokens = content::token_set(&record.title);
        tokens.extend(content::token_set(&record.summary));
        Self { record, tokens }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.record.published_at.unwrap_or(self.record.processed_at)
    }
}

/// Similarity scoring capability, pluggable so keyword- and embedding-based
/// implementations are interchangeable without touching the pipeline.
pub trait SimilarityScorer: Send + Sync {
    /// Similarity in [0, 1]; higher means more alike.
    fn score(&self, a: &DigestSource, b: &DigestSource) -> f64;
}

/// Deterministic default: Jaccard overlap over title+summary token sets.
pub struct TokenOverlapScorer;

impl SimilarityScorer for TokenOverlapScorer {
    fn score(&self, a: &DigestSource, b: &DigestSource) -> f64 {
        if a.tokens.is_empty() || b.tokens.is_empty() {
            return 0.0;
        }
        let intersection = a.tokens.intersection(&b.tokens).count();
        let union = a.tokens.len() + b.tokens.len() - intersection;
        intersection as f64 / union as f64
    }
}

/// Near-duplicate stories grouped under one canonical representative.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Members in arrival order; the earliest entry is canonical.
    pub members: Vec<DigestSource>,
}

impl Cluster {
    pub fn canonical(&self) -> &DigestSource {
        // Construction guarantees at least one member, earliest first.
        &self.members[0]
    }

    fn newest(&self) -> DateTime<Utc> {
        self.members
            .iter()
            .map(|m| m.timestamp())
            .max()
            .unwrap_or_else(Utc::now)
    }
}

/// A published briefing. Once published it is never mutated; the next run
/// produces a fresh entry.
#[derive(Debug, Clone)]
pub struct Digest {
    pub date: NaiveDate,
    pub clusters: Vec<Cluster>,
    pub content: String,
    pub entry_id: i64,
}

pub struct DigestEngine {
    store: Arc<dyn EntryStore>,
    processed: Arc<ProcessedLog>,
    scorer: Box<dyn SimilarityScorer>,
    threshold: f64,
    window: Duration,
    title: String,
    publish_retry: RetryPolicy,
    state: StdMutex<DigestState>,
}

impl DigestEngine {
    pub fn new(
        store: Arc<dyn EntryStore>,
        processed: Arc<ProcessedLog>,
        scorer: Box<dyn SimilarityScorer>,
        threshold: f64,
        window: Duration,
        title: String,
        publish_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            processed,
            scorer,
            threshold,
            window,
            title,
            publish_retry,
            state: StdMutex::new(DigestState::Idle),
        }
    }

    pub fn state(&self) -> DigestState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: DigestState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Generate and publish the digest for `date` over the configured
    /// window. Returns `None` when nothing was processed in the window.
    pub async fn generate_digest(&self, date: NaiveDate) -> Result<Option<Digest>> {
        let result = self.run(date).await;
        self.set_state(DigestState::Idle);
        result
    }

    async fn run(&self, date: NaiveDate) -> Result<Option<Digest>> {
        self.set_state(DigestState::Collecting);
        let sources = self.collect()?;
        if sources.is_empty() {
            info!("no processed entries in window, skipping digest");
            return Ok(None);
        }
        info!(sources = sources.len(), "collected digest sources");

        self.set_state(DigestState::Clustering);
        let clusters = self.cluster(sources)?;
        info!(clusters = clusters.len(), "clustered digest sources");

        self.set_state(DigestState::Rendering);
        let content = render_digest(&self.title, date, &clusters);

        let digest_title = format!("{} — {}", self.title, date.format("%Y-%m-%d"));
        let entry_id = self
            .publish_retry
            .execute("publish_digest", || {
                self.store.create_entry(&digest_title, &content)
            })
            .await
            .map_err(|e| EnricherError::Digest {
                stage: "publishing",
                reason: e.to_string(),
            })?;

        self.set_state(DigestState::Published);
        info!(entry_id, clusters = clusters.len(), "digest published");

        // Published digests are append-only; the source log resets so the
        // next window starts clean.
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::hours(24));
        self.processed.prune_before(cutoff);

        Ok(Some(Digest {
            date,
            clusters,
            content,
            entry_id,
        }))
    }

    fn collect(&self) -> Result<Vec<DigestSource>> {
        let mut records = self.processed.collect_window(self.window);
        // One source per entry even when several agents processed it.
        records.sort_by_key(|r| r.entry_id);
        records.dedup_by_key(|r| r.entry_id);

        let mut sources: Vec<DigestSource> = records.into_iter().map(DigestSource::new).collect();
        sources.sort_by_key(DigestSource::timestamp);
        Ok(sources)
    }

    /// Greedy single-pass clustering: walk sources in chronological order
    /// and attach each one to the best cluster whose canonical entry scores
    /// at or above the threshold, so the earliest story always anchors its
    /// cluster.
    fn cluster(&self, sources: Vec<DigestSource>) -> Result<Vec<Cluster>> {
        let mut clusters: Vec<Cluster> = Vec::new();

        for source in sources {
            let mut best: Option<(usize, f64)> = None;
            for (i, cluster) in clusters.iter().enumerate() {
                let score = self.scorer.score(cluster.canonical(), &source);
                if score >= self.threshold && best.map_or(true, |(_, s)| score > s) {
                    best = Some((i, score));
                }
            }
            match best {
                Some((i, score)) => {
                    debug!(
                        canonical = %clusters[i].canonical().record.title,
                        member = %source.record.title,
                        score,
                        "joined cluster"
                    );
                    clusters[i].members.push(source);
                }
                None => clusters.push(Cluster {
                    members: vec![source],
                }),
            }
        }

        // Bigger stories first, freshest as a tie break.
        clusters.sort_by(|a, b| {
            b.members
                .len()
                .cmp(&a.members.len())
                .then(b.newest().cmp(&a.newest()))
        });
        Ok(clusters)
    }
}

/// Render a markdown briefing: one section per cluster, citing every member.
fn render_digest(title: &str, date: NaiveDate, clusters: &[Cluster]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} — {}\n\n", title, date.format("%B %d, %Y")));
    out.push_str(&format!(
        "{} stories across {} sources.\n\n",
        clusters.len(),
        clusters.iter().map(|c| c.members.len()).sum::<usize>()
    ));

    for cluster in clusters {
        let canonical = cluster.canonical();
        out.push_str(&format!("## {}\n\n", canonical.record.title));
        out.push_str(canonical.record.summary.trim());
        out.push_str("\n\n");
        out.push_str("Sources:\n");
        for member in &cluster.members {
            let label = if member.record.feed_title.is_empty() {
                member.record.title.as_str()
            } else {
                member.record.feed_title.as_str()
            };
            out.push_str(&format!("- [{}]({})\n", label, member.record.url));
        }
        out.push('\n');
    }

    if clusters.is_empty() {
        warn!("rendering digest with no clusters");
    }
    out
}

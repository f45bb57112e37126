//! Sentinel-delimited marker blocks and the idempotent content mutator.
//!
//! Every agent's rendered output is written into the entry as a block
//! followed by a sentinel `<div>` carrying the agent id and a hash of the
//! non-AI portion of the content at generation time. The original article
//! body always sits after the last sentinel and is never rewritten.
//!
//! The sentinel grammar is fixed and parsed with a strict pattern so that
//! unrelated `<div>`s in article HTML can never be mistaken for markers.

use crate::client::EntryStore;
use crate::types::{EnricherError, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<div data-ai-agent="([A-Za-z0-9_-]+)" data-source-hash="([0-9a-f]{16})" style="display: none;"></div>"#,
    )
    .expect("marker pattern is valid")
});

/// Hash of the non-AI portion of entry content: SHA-256, first 16 hex chars.
pub fn source_hash(original: &str) -> String {
    let digest = Sha256::digest(original.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn render_marker(agent: &str, hash: &str) -> String {
    format!(r#"<div data-ai-agent="{agent}" data-source-hash="{hash}" style="display: none;"></div>"#)
}

/// One agent's injected block as recovered from entry content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerBlock {
    pub agent: String,
    pub source_hash: String,
    pub body: String,
}

/// Entry content split into agent blocks and the untouched original body.
#[derive(Debug, Clone, Default)]
pub struct ParsedContent {
    pub blocks: Vec<MarkerBlock>,
    pub original: String,
}

impl ParsedContent {
    pub fn block_for(&self, agent: &str) -> Option<&MarkerBlock> {
        self.blocks.iter().find(|b| b.agent == agent)
    }
}

/// Split entry content at sentinel boundaries. Each block is the text between
/// the previous sentinel (or the start) and its own sentinel; the original
/// body is everything after the last sentinel. Content without sentinels is
/// all original.
pub fn parse_content(content: &str) -> ParsedContent {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    for caps in MARKER_PATTERN.captures_iter(content) {
        let m = caps.get(0).expect("capture 0 always present");
        let body = &content[cursor..m.start()];
        if !body.trim().is_empty() {
            blocks.push(MarkerBlock {
                agent: caps[1].to_string(),
                source_hash: caps[2].to_string(),
                body: body.to_string(),
            });
        }
        cursor = m.end();
    }

    if cursor == 0 {
        return ParsedContent {
            blocks: Vec::new(),
            original: content.to_string(),
        };
    }

    ParsedContent {
        blocks,
        original: content[cursor..].to_string(),
    }
}

/// Reassemble entry content: agent blocks in configuration order, each
/// terminated by its sentinel, then the original body. Rebuilding twice from
/// the same inputs is byte-identical.
pub fn build_content(blocks: &[MarkerBlock], agent_order: &[String], original: &str) -> String {
    let mut out = String::new();
    for agent in agent_order {
        if let Some(block) = blocks.iter().find(|b| &b.agent == agent) {
            out.push_str(&block.body);
            out.push_str(&render_marker(&block.agent, &block.source_hash));
        }
    }
    out.push_str(original);
    out
}

/// Outcome of an injection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    Applied,
    Skipped,
}

/// Performs idempotent, non-destructive injection of agent blocks through
/// the entry store. Callers must hold the per-entry write lock for the whole
/// read-modify-write cycle.
pub struct MarkerMutator {
    store: Arc<dyn EntryStore>,
    agent_order: Vec<String>,
}

impl MarkerMutator {
    pub fn new(store: Arc<dyn EntryStore>, agent_order: Vec<String>) -> Self {
        Self { store, agent_order }
    }

    /// Write `rendered_block` for `agent` into the entry.
    ///
    /// `generation_hash` is the hash of the original body the block was
    /// generated from. An existing block with the same hash is a no-op; a
    /// body that changed since generation is a conflict and is skipped
    /// rather than overwritten with stale output.
    pub async fn inject(
        &self,
        entry_id: i64,
        agent: &str,
        rendered_block: &str,
        generation_hash: &str,
    ) -> Result<InjectOutcome> {
        if MARKER_PATTERN.is_match(rendered_block) {
            return Err(EnricherError::Conflict {
                entry_id,
                reason: format!("rendered block for agent '{agent}' contains a sentinel"),
            });
        }

        // Re-read the persisted content: another agent may have written
        // since this entry was fetched at the start of the sweep.
        let current = self.store.fetch_entry(entry_id).await?;
        let parsed = parse_content(&current.content);

        let duplicates = parsed.blocks.iter().filter(|b| b.agent == agent).count();
        if duplicates > 1 {
            return Err(EnricherError::Conflict {
                entry_id,
                reason: format!("found {duplicates} marker blocks for agent '{agent}'"),
            });
        }

        if let Some(existing) = parsed.block_for(agent) {
            if existing.source_hash == generation_hash {
                debug!(entry_id, agent, "marker up to date, skipping");
                return Ok(InjectOutcome::Skipped);
            }
        }

        let current_hash = source_hash(&parsed.original);
        if current_hash != generation_hash {
            warn!(entry_id, agent, current_hash, generation_hash,
                  "source content changed since generation, skipping");
            return Err(EnricherError::Conflict {
                entry_id,
                reason: "source content changed since block generation".to_string(),
            });
        }

        let mut blocks: Vec<MarkerBlock> = parsed
            .blocks
            .into_iter()
            .filter(|b| b.agent != agent)
            .collect();
        blocks.push(MarkerBlock {
            agent: agent.to_string(),
            source_hash: generation_hash.to_string(),
            body: rendered_block.to_string(),
        });

        let rebuilt = build_content(&blocks, &self.agent_order, &parsed.original);
        self.store.update_content(entry_id, &rebuilt).await?;
        info!(entry_id, agent, "marker block applied");
        Ok(InjectOutcome::Applied)
    }
}

/// Process-wide, read-mostly cache of the last known source hash per
/// (entry, agent). Purely an optimization to skip LLM calls for unchanged
/// entries; always recoverable by re-parsing entry content.
#[derive(Debug, Default)]
pub struct MarkerIndex {
    inner: std::sync::RwLock<HashMap<(i64, String), String>>,
}

impl MarkerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entry_id: i64, agent: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(&(entry_id, agent.to_string())).cloned()
    }

    pub fn record(&self, entry_id: i64, agent: &str, hash: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert((entry_id, agent.to_string()), hash.to_string());
    }

    /// Drop cached hashes for entries outside the live set. Entries that
    /// left the unread queue will not be swept again, so their records only
    /// accumulate; a dropped record costs one content re-parse at most.
    pub fn retain_entries(&self, live: &HashSet<i64>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.retain(|(entry_id, _), _| live.contains(entry_id));
    }
}

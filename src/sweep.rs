//! Sweep driver: paginated unread fetch feeding a bounded worker pool of
//! (entry, agent) tasks.
//!
//! Pages are fetched sequentially because each depends on the prior page's
//! cursor; every entry within a page fans out concurrently. Failures on one
//! item never cancel siblings; they land in the end-of-sweep report. Writes
//! to a single entry's content are serialized through a per-entry lock so
//! concurrent agents cannot lose one another's blocks.

use crate::client::EntryStore;
use crate::config::Agent;
use crate::content;
use crate::llm::{render_output, render_prompt, CompletionBackend};
use crate::markers::{self, InjectOutcome, MarkerIndex, MarkerMutator};
use crate::retry::RetryPolicy;
use crate::rules::Verdict;
use crate::types::{Entry, ItemFailure, ProcessedRecord, Result, SkipReason, SweepReport};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Explicitly owned pool of worker permits shared by all (entry, agent)
/// tasks. Constructed once at startup and passed to the components that
/// need it; its lifetime matches the service run loop.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed while the pool is alive.
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore closed")
    }
}

/// Per-entry write locks, created lazily on first sight of an entry.
#[derive(Default)]
struct EntryLocks {
    inner: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl EntryLocks {
    fn lock_for(&self, entry_id: i64) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(entry_id).or_default().clone()
    }
}

/// In-memory log of successfully processed items that the digest engine
/// collects from. Read-mostly; writes happen under a narrow lock.
#[derive(Default)]
pub struct ProcessedLog {
    inner: StdMutex<Vec<ProcessedRecord>>,
}

impl ProcessedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: ProcessedRecord) {
        let mut log = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        log.push(record);
    }

    /// Records processed within the window ending now.
    pub fn collect_window(&self, window: Duration) -> Vec<ProcessedRecord> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(24));
        let log = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        log.iter()
            .filter(|r| r.processed_at >= cutoff)
            .cloned()
            .collect()
    }

    /// Drop records older than the cutoff so the log cannot grow unbounded.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) {
        let mut log = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        log.retain(|r| r.processed_at >= cutoff);
    }
}

enum ItemOutcome {
    Processed,
    Skipped(SkipReason),
}

struct ItemResult {
    entry_id: i64,
    agent: String,
    outcome: Result<ItemOutcome>,
}

/// Drives one complete pass over unread entries.
pub struct SweepRunner {
    store: Arc<dyn EntryStore>,
    backend: Arc<dyn CompletionBackend>,
    agents: Arc<Vec<Agent>>,
    mutator: Arc<MarkerMutator>,
    marker_index: Arc<MarkerIndex>,
    processed: Arc<ProcessedLog>,
    pool: Arc<WorkerPool>,
    retry: RetryPolicy,
    page_size: usize,
    /// Soft deadline: items not dispatched in time are left for the next
    /// sweep rather than force-failed.
    budget: Option<Duration>,
    cancel: Arc<AtomicBool>,
}

impl SweepRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn EntryStore>,
        backend: Arc<dyn CompletionBackend>,
        agents: Vec<Agent>,
        pool: Arc<WorkerPool>,
        retry: RetryPolicy,
        page_size: usize,
        budget: Option<Duration>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let agent_order: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();
        let mutator = Arc::new(MarkerMutator::new(store.clone(), agent_order));
        Self {
            store,
            backend,
            agents: Arc::new(agents),
            mutator,
            marker_index: Arc::new(MarkerIndex::new()),
            processed: Arc::new(ProcessedLog::new()),
            pool,
            retry,
            page_size,
            budget,
            cancel,
        }
    }

    pub fn processed_log(&self) -> Arc<ProcessedLog> {
        self.processed.clone()
    }

    /// One complete paginated pass over currently unread entries.
    pub async fn run(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let deadline = self.budget.map(|b| started + b);
        let locks = Arc::new(EntryLocks::default());
        let mut tasks: JoinSet<ItemResult> = JoinSet::new();
        let mut report = SweepReport::default();
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut cursor: u64 = 0;
        let mut saw_every_page = true;

        info!(page_size = self.page_size, agents = self.agents.len(), "starting sweep");

        loop {
            // Cooperative cancellation between page fetches: dispatched
            // tasks run to completion so no marker is left half written.
            if self.cancel.load(Ordering::Relaxed) {
                info!("sweep cancelled before next page fetch");
                saw_every_page = false;
                break;
            }

            let page = match self
                .retry
                .execute("fetch_unread", || self.store.fetch_unread(cursor, self.page_size))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    // The whole page failed; never partially skip it.
                    error!(cursor, error = %e, "page fetch failed, ending pagination");
                    report.failures.push(ItemFailure {
                        entry_id: 0,
                        agent: "fetch".to_string(),
                        error: e.to_string(),
                    });
                    saw_every_page = false;
                    break;
                }
            };

            for entry in page.entries {
                if !seen_ids.insert(entry.id) {
                    debug!(entry_id = entry.id, "duplicate entry within sweep, skipping");
                    continue;
                }
                report.entries_seen += 1;
                self.dispatch_entry(entry, &locks, deadline, &mut tasks, &mut report)
                    .await;
            }

            match page.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => Self::tally(result, &mut report),
                Err(e) => {
                    // A panicked task loses its item but not the sweep.
                    error!(error = %e, "worker task aborted");
                    report.failures.push(ItemFailure {
                        entry_id: 0,
                        agent: "pool".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // After a complete pass the unread set just seen is the index's
        // whole working set; anything else belongs to entries that left the
        // queue. A truncated pass saw too little to prune against.
        if saw_every_page {
            self.marker_index.retain_entries(&seen_ids);
        }

        report.elapsed = started.elapsed();
        info!(
            entries = report.entries_seen,
            processed = report.items_processed,
            skipped = report.items_skipped,
            deferred = report.items_deferred,
            failed = report.items_failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sweep finished"
        );
        Ok(report)
    }

    /// Process a batch of entries delivered out of band (webhook payloads)
    /// through the same pool and isolation rules as a paginated sweep.
    pub async fn process_entries(&self, entries: Vec<Entry>) -> Result<SweepReport> {
        let started = Instant::now();
        let deadline = self.budget.map(|b| started + b);
        let locks = Arc::new(EntryLocks::default());
        let mut tasks: JoinSet<ItemResult> = JoinSet::new();
        let mut report = SweepReport::default();
        let mut seen_ids: HashSet<i64> = HashSet::new();

        for entry in entries {
            if !seen_ids.insert(entry.id) {
                continue;
            }
            report.entries_seen += 1;
            self.dispatch_entry(entry, &locks, deadline, &mut tasks, &mut report)
                .await;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => Self::tally(result, &mut report),
                Err(e) => {
                    error!(error = %e, "worker task aborted");
                    report.failures.push(ItemFailure {
                        entry_id: 0,
                        agent: "pool".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    async fn dispatch_entry(
        &self,
        entry: Entry,
        locks: &Arc<EntryLocks>,
        deadline: Option<Instant>,
        tasks: &mut JoinSet<ItemResult>,
        report: &mut SweepReport,
    ) {
        for agent in self.agents.iter() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                report.items_deferred += 1;
                continue;
            }

            let permit = self.pool.acquire().await;
            let entry = entry.clone();
            let agent = agent.clone();
            let backend = self.backend.clone();
            let mutator = self.mutator.clone();
            let marker_index = self.marker_index.clone();
            let processed = self.processed.clone();
            let retry = self.retry.clone();
            let entry_lock = locks.lock_for(entry.id);

            tasks.spawn(async move {
                let _permit = permit;
                let entry_id = entry.id;
                let agent_name = agent.name.clone();
                let outcome = process_item(
                    entry,
                    agent,
                    backend,
                    mutator,
                    marker_index,
                    processed,
                    retry,
                    entry_lock,
                )
                .await;
                ItemResult {
                    entry_id,
                    agent: agent_name,
                    outcome,
                }
            });
        }
    }

    fn tally(result: ItemResult, report: &mut SweepReport) {
        match result.outcome {
            Ok(ItemOutcome::Processed) => report.items_processed += 1,
            Ok(ItemOutcome::Skipped(reason)) => {
                debug!(entry_id = result.entry_id, agent = %result.agent, ?reason, "item skipped");
                report.items_skipped += 1;
            }
            Err(e) => {
                warn!(entry_id = result.entry_id, agent = %result.agent, error = %e, "item failed");
                report.failures.push(ItemFailure {
                    entry_id: result.entry_id,
                    agent: result.agent,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Run one (entry, agent) work item end to end.
#[allow(clippy::too_many_arguments)]
async fn process_item(
    entry: Entry,
    agent: Agent,
    backend: Arc<dyn CompletionBackend>,
    mutator: Arc<MarkerMutator>,
    marker_index: Arc<MarkerIndex>,
    processed: Arc<ProcessedLog>,
    retry: RetryPolicy,
    entry_lock: Arc<Mutex<()>>,
) -> Result<ItemOutcome> {
    let feed = entry.feed();

    // Rejected entries must never reach the LLM backend.
    if agent.rules.evaluate(&entry, &feed) == Verdict::Reject {
        return Ok(ItemOutcome::Skipped(SkipReason::Rejected));
    }

    let parsed = markers::parse_content(&entry.content);
    if parsed.original.trim().is_empty() {
        return Ok(ItemOutcome::Skipped(SkipReason::EmptyContent));
    }
    let generation_hash = markers::source_hash(&parsed.original);

    // Skip the external call entirely when the recorded block already
    // matches the current source body.
    let known_hash = marker_index
        .get(entry.id, &agent.name)
        .or_else(|| parsed.block_for(&agent.name).map(|b| b.source_hash.clone()));
    if known_hash.as_deref() == Some(generation_hash.as_str()) {
        return Ok(ItemOutcome::Skipped(SkipReason::UpToDate));
    }

    let article = content::to_markdown(&parsed.original);
    let (system_prompt, user_prompt) = render_prompt(&agent.prompt, &article);

    let completion = retry
        .execute("completion", || backend.complete(&system_prompt, &user_prompt))
        .await?;
    if completion.trim().is_empty() {
        return Ok(ItemOutcome::Skipped(SkipReason::EmptyContent));
    }

    let rendered = render_output(&agent.template, &completion);

    // Serialize the read-modify-write against other agents on this entry.
    let outcome = {
        let _guard = entry_lock.lock().await;
        mutator
            .inject(entry.id, &agent.name, &rendered, &generation_hash)
            .await?
    };

    marker_index.record(entry.id, &agent.name, &generation_hash);

    if outcome == InjectOutcome::Applied {
        processed.record(ProcessedRecord {
            entry_id: entry.id,
            agent: agent.name.clone(),
            title: entry.title.clone(),
            url: entry.url.clone(),
            feed_title: feed.title.clone(),
            summary: completion,
            published_at: entry.published_at,
            processed_at: Utc::now(),
        });
        Ok(ItemOutcome::Processed)
    } else {
        Ok(ItemOutcome::Skipped(SkipReason::UpToDate))
    }
}

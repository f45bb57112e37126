mod common;

use chrono::{NaiveDate, TimeZone, Utc};
use common::MemoryStore;
use feed_enricher::digest::{DigestEngine, DigestSource, SimilarityScorer, TokenOverlapScorer};
use feed_enricher::sweep::ProcessedLog;
use feed_enricher::types::ProcessedRecord;
use std::sync::Arc;
use std::time::Duration;

fn record(entry_id: i64, title: &str, summary: &str, feed: &str, hour: u32) -> ProcessedRecord {
    ProcessedRecord {
        entry_id,
        agent: "summary".to_string(),
        title: title.to_string(),
        url: format!("https://{}/{}", feed, entry_id),
        feed_title: feed.to_string(),
        summary: summary.to_string(),
        published_at: Some(Utc.with_ymd_and_hms(2026, 8, 29, hour, 0, 0).unwrap()),
        processed_at: Utc::now(),
    }
}

fn engine(store: Arc<MemoryStore>, log: Arc<ProcessedLog>, threshold: f64) -> DigestEngine {
    DigestEngine::new(
        store,
        log,
        Box::new(TokenOverlapScorer),
        threshold,
        Duration::from_secs(24 * 3600),
        "Daily Briefing".to_string(),
        common::fast_retry(2),
    )
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
}

#[test]
fn token_overlap_scores_near_duplicates_high() {
    let a = record(1, "OpenAI releases new flagship model", "OpenAI released a new flagship language model today", "wire-a.example", 8);
    let b = record(2, "OpenAI releases flagship model", "A new flagship language model was released by OpenAI", "wire-b.example", 9);
    let c = record(3, "Local team wins championship", "The championship game ended with a dramatic final score", "sports.example", 9);

    let (a, b, c) = (
        source_from(a),
        source_from(b),
        source_from(c),
    );
    let scorer = TokenOverlapScorer;
    assert!(scorer.score(&a, &b) > 0.4, "near duplicates score high");
    assert!(scorer.score(&a, &c) < 0.1, "unrelated stories score low");
}

fn source_from(record: ProcessedRecord) -> DigestSource {
    let mut tokens = feed_enricher::content::token_set(&record.title);
    tokens.extend(feed_enricher::content::token_set(&record.summary));
    DigestSource { record, tokens }
}

#[tokio::test]
async fn near_duplicates_collapse_into_one_cited_cluster() {
    let store = Arc::new(MemoryStore::new(Vec::new()));
    let log = Arc::new(ProcessedLog::new());
    // The same story from two different feeds, plus one unrelated story.
    log.record(record(1, "OpenAI releases new flagship model", "OpenAI released a new flagship language model today", "wire-a.example", 8));
    log.record(record(2, "OpenAI releases flagship model", "A new flagship language model was released by OpenAI", "wire-b.example", 9));
    log.record(record(3, "Local team wins championship", "The championship game ended with a dramatic final score", "sports.example", 9));

    let digest = engine(store.clone(), log, 0.35)
        .generate_digest(date())
        .await
        .unwrap()
        .expect("digest published");

    assert_eq!(digest.clusters.len(), 2);
    let big = &digest.clusters[0];
    assert_eq!(big.members.len(), 2, "duplicates share one cluster");
    // The earliest story anchors the cluster.
    assert_eq!(big.canonical().record.entry_id, 1);

    // One section, two citation backlinks.
    assert_eq!(digest.content.matches("OpenAI releases").count(), 1);
    assert!(digest.content.contains("https://wire-a.example/1"));
    assert!(digest.content.contains("https://wire-b.example/2"));
}

#[tokio::test]
async fn digest_publishes_through_the_create_path() {
    let store = Arc::new(MemoryStore::new(Vec::new()));
    let log = Arc::new(ProcessedLog::new());
    log.record(record(1, "A story", "Something notable happened today", "feed.example", 8));

    let digest = engine(store.clone(), log, 0.35)
        .generate_digest(date())
        .await
        .unwrap()
        .expect("digest published");

    let created = store.created_entries();
    assert_eq!(created.len(), 1);
    assert!(created[0].0.contains("Daily Briefing"));
    assert_eq!(created[0].1, digest.content);
    // Publishing never touches existing entries.
    assert_eq!(store.update_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_window_skips_publication() {
    let store = Arc::new(MemoryStore::new(Vec::new()));
    let log = Arc::new(ProcessedLog::new());

    let result = engine(store.clone(), log, 0.35).generate_digest(date()).await.unwrap();
    assert!(result.is_none());
    assert!(store.created_entries().is_empty());
}

#[tokio::test]
async fn clusters_are_ordered_by_size() {
    let store = Arc::new(MemoryStore::new(Vec::new()));
    let log = Arc::new(ProcessedLog::new());
    log.record(record(1, "Quarterly results beat expectations", "The company reported quarterly results beating analyst expectations", "biz-a.example", 7));
    log.record(record(2, "Quarterly results top expectations", "Quarterly results from the company beat analyst expectations", "biz-b.example", 8));
    log.record(record(3, "Quarterly results exceed expectations", "Analyst expectations were beaten by the company quarterly results", "biz-c.example", 9));
    log.record(record(4, "A lone unrelated essay", "Musings on gardening and the passage of seasons", "blog.example", 6));

    let digest = engine(store, log, 0.35)
        .generate_digest(date())
        .await
        .unwrap()
        .expect("digest published");

    assert_eq!(digest.clusters.len(), 2);
    assert_eq!(digest.clusters[0].members.len(), 3);
    assert_eq!(digest.clusters[1].members.len(), 1);
}

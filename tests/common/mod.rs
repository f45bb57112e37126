//! Shared in-memory fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use feed_enricher::client::EntryStore;
use feed_enricher::llm::CompletionBackend;
use feed_enricher::types::{EnricherError, Entry, EntryPage, Feed, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory entry store mimicking the aggregator API: unread entries in
/// descending id order, offset-based pagination, and a create path.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<i64, Entry>>,
    created: Mutex<Vec<(String, String)>>,
    pub fetch_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().map(|e| (e.id, e)).collect()),
            created: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    pub fn content_of(&self, entry_id: i64) -> String {
        self.entries.lock().unwrap()[&entry_id].content.clone()
    }

    pub fn created_entries(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn fetch_unread(&self, cursor: u64, page_size: usize) -> Result<EntryPage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let all: Vec<Entry> = {
            let map = self.entries.lock().unwrap();
            let mut list: Vec<Entry> = map.values().cloned().collect();
            list.sort_by(|a, b| b.id.cmp(&a.id));
            list
        };
        let total = all.len() as u64;
        let start = cursor as usize;
        let entries: Vec<Entry> = all.into_iter().skip(start).take(page_size).collect();
        let fetched = entries.len() as u64;
        let next_cursor = if fetched > 0 && cursor + fetched < total {
            Some(cursor + fetched)
        } else {
            None
        };
        Ok(EntryPage {
            entries,
            next_cursor,
        })
    }

    async fn fetch_entry(&self, entry_id: i64) -> Result<Entry> {
        self.entries
            .lock()
            .unwrap()
            .get(&entry_id)
            .cloned()
            .ok_or_else(|| EnricherError::General(format!("no entry {entry_id}")))
    }

    async fn update_content(&self, entry_id: i64, content: &str) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut map = self.entries.lock().unwrap();
        match map.get_mut(&entry_id) {
            Some(entry) => {
                entry.content = content.to_string();
                Ok(())
            }
            None => Err(EnricherError::General(format!("no entry {entry_id}"))),
        }
    }

    async fn create_entry(&self, title: &str, content: &str) -> Result<i64> {
        let mut created = self.created.lock().unwrap();
        created.push((title.to_string(), content.to_string()));
        Ok(1000 + created.len() as i64)
    }
}

/// Backend that answers every prompt with a fixed prefix plus a call count.
pub struct EchoBackend {
    pub calls: AtomicUsize,
    prefix: String,
}

impl EchoBackend {
    pub fn new(prefix: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prefix: prefix.to_string(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for EchoBackend {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} output", self.prefix))
    }
}

/// Backend that fails every call with a retryable server error.
pub struct FailingBackend {
    pub calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for FailingBackend {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EnricherError::Server { status: 503 })
    }
}

pub fn entry(id: i64, title: &str, content: &str) -> Entry {
    Entry {
        id,
        feed_id: 1,
        title: title.to_string(),
        url: format!("https://example.com/articles/{id}"),
        content: content.to_string(),
        feed: Some(Feed {
            id: 1,
            title: "Example Feed".to_string(),
            site_url: "https://example.com".to_string(),
            category: None,
        }),
        ..Entry::default()
    }
}

pub fn fast_retry(max_attempts: u32) -> feed_enricher::RetryPolicy {
    feed_enricher::RetryPolicy {
        max_attempts,
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(5),
        multiplier: 2.0,
    }
}

pub fn agent(name: &str) -> feed_enricher::Agent {
    agent_with_rules(name, &[], &[])
}

pub fn agent_with_rules(name: &str, allow: &[&str], deny: &[&str]) -> feed_enricher::Agent {
    let allow: Vec<String> = allow.iter().map(|s| s.to_string()).collect();
    let deny: Vec<String> = deny.iter().map(|s| s.to_string()).collect();
    feed_enricher::Agent {
        name: name.to_string(),
        prompt: "Summarize: ${content}".to_string(),
        template: format!("<blockquote data-agent=\"{name}\">${{content}}</blockquote>"),
        rules: feed_enricher::RuleSet::compile(&allow, &deny).expect("test rules compile"),
    }
}

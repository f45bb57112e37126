pub mod client;
pub mod config;
pub mod content;
pub mod digest;
pub mod llm;
pub mod markers;
pub mod retry;
pub mod rules;
pub mod scheduler;
pub mod sweep;
pub mod types;
pub mod webhook;

pub use client::{EntryStore, MinifluxClient};
pub use config::{Agent, Settings};
pub use digest::{Digest, DigestEngine, SimilarityScorer, TokenOverlapScorer};
pub use llm::{CompletionBackend, OpenAiBackend};
pub use markers::{InjectOutcome, MarkerMutator};
pub use retry::RetryPolicy;
pub use rules::{Rule, RuleSet, Verdict};
pub use scheduler::Scheduler;
pub use sweep::{ProcessedLog, SweepRunner, WorkerPool};
pub use types::*;

//! Service configuration: aggregator credentials, LLM backend, retry policy,
//! agent definitions, and the digest schedule.
//!
//! All validation happens at load time. A malformed rule, duplicate agent id
//! or unparsable schedule stops the service instead of silently degrading:
//! misconfigured filtering risks either over-processing (cost) or silent
//! content loss.

use crate::client::StoreConfig;
use crate::llm::BackendConfig;
use crate::retry::RetryPolicy;
use crate::rules::RuleSet;
use crate::types::{EnricherError, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub miniflux: MinifluxSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub sweep: SweepSection,
    #[serde(default)]
    pub digest: DigestSection,
    #[serde(default)]
    pub agents: Vec<AgentSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinifluxSection {
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_store_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepSection {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Soft overall budget for one sweep, in seconds. Zero disables it.
    #[serde(default)]
    pub budget_seconds: u64,
    /// Minutes between scheduled sweeps. Defaults to 15 when a webhook
    /// secret is configured (the webhook carries the load) and 1 otherwise.
    #[serde(default)]
    pub interval_minutes: Option<u64>,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            budget_seconds: 0,
            interval_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DigestSection {
    /// Daily digest times as "HH:MM". Empty disables the digest.
    #[serde(default)]
    pub schedule: Vec<String>,
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_digest_title")]
    pub title: String,
}

impl Default for DigestSection {
    fn default() -> Self {
        Self {
            schedule: Vec::new(),
            window_hours: default_window_hours(),
            similarity_threshold: default_similarity_threshold(),
            title: default_digest_title(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub allow_rules: Vec<String>,
    #[serde(default)]
    pub deny_rules: Vec<String>,
    // Legacy keys from the pre-rules config format. Present means the file
    // needs migration, which is a startup error rather than a guess.
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    style_block: Option<bool>,
}

/// A validated, immutable agent: prompt and output templates plus compiled
/// rule sets. Configured externally; never changes during a run.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub prompt: String,
    pub template: String,
    pub rules: RuleSet,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_store_timeout() -> u64 {
    30
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_page_size() -> usize {
    100
}
fn default_window_hours() -> u64 {
    24
}
fn default_similarity_threshold() -> f64 {
    0.35
}
fn default_digest_title() -> String {
    "Daily Briefing".to_string()
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&raw)
            .map_err(|e| EnricherError::Config(format!("failed to parse {}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(EnricherError::Config("no agents configured".into()));
        }

        let mut seen = HashSet::new();
        let mut legacy = Vec::new();
        for agent in &self.agents {
            if agent.name.is_empty()
                || !agent
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(EnricherError::Config(format!(
                    "agent name '{}' must be non-empty and [A-Za-z0-9_-]",
                    agent.name
                )));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(EnricherError::Config(format!(
                    "duplicate agent id '{}'",
                    agent.name
                )));
            }
            if agent.title.is_some() || agent.style_block.is_some() {
                legacy.push(agent.name.as_str());
            }
        }
        if !legacy.is_empty() {
            return Err(EnricherError::Config(format!(
                "agents [{}] use the outdated title/style_block format; migrate to templates",
                legacy.join(", ")
            )));
        }

        for time in &self.digest.schedule {
            NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| {
                EnricherError::Config(format!("invalid digest schedule time '{time}'"))
            })?;
        }
        if !(0.0..=1.0).contains(&self.digest.similarity_threshold) {
            return Err(EnricherError::Config(
                "digest similarity_threshold must be within [0, 1]".into(),
            ));
        }
        if self.llm.max_workers == 0 {
            return Err(EnricherError::Config("llm max_workers must be > 0".into()));
        }
        if self.sweep.page_size == 0 {
            return Err(EnricherError::Config("sweep page_size must be > 0".into()));
        }

        Ok(())
    }

    /// Compile agent rule sets. Any malformed rule fails the whole load.
    pub fn compile_agents(&self) -> Result<Vec<Agent>> {
        self.agents
            .iter()
            .map(|a| {
                Ok(Agent {
                    name: a.name.clone(),
                    prompt: a.prompt.clone(),
                    template: a.template.clone(),
                    rules: RuleSet::compile(&a.allow_rules, &a.deny_rules)?,
                })
            })
            .collect()
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            base_url: self.miniflux.base_url.clone(),
            api_key: self.miniflux.api_key.clone(),
            timeout: Duration::from_secs(self.miniflux.timeout_seconds),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.llm.base_url.clone(),
            api_key: self.llm.api_key.clone(),
            model: self.llm.model.clone(),
            timeout: Duration::from_secs(self.llm.timeout_seconds),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: 2.0,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        let minutes = self.sweep.interval_minutes.unwrap_or(
            if self.miniflux.webhook_secret.is_some() {
                15
            } else {
                1
            },
        );
        Duration::from_secs(minutes.max(1) * 60)
    }

    pub fn digest_times(&self) -> Vec<NaiveTime> {
        // Validated at load; unparsable entries cannot reach here.
        self.digest
            .schedule
            .iter()
            .filter_map(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
            .collect()
    }
}

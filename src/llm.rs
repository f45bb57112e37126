//! Text-completion backend consumed by agents.
//!
//! The pipeline is provider-agnostic: anything that turns a prompt pair into
//! text satisfies `CompletionBackend`. The default implementation speaks the
//! OpenAI-compatible chat completions protocol against a configurable
//! endpoint, model, and credential.

use crate::types::{EnricherError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a feed enrichment agent, skillfully \
interpreting RSS content to reframe its message with clarity and depth as requested.";

const CONTENT_PLACEHOLDER: &str = "${content}";

/// Completion-style call: prompt in, text out.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Split an agent's prompt template and the article markdown into the
/// (system, user) prompt pair.
///
/// A template containing `${content}` is treated as a full user prompt with
/// the article substituted in; otherwise the template is the system prompt
/// and the article markdown is the user prompt.
pub fn render_prompt(template: &str, article_markdown: &str) -> (String, String) {
    if template.contains(CONTENT_PLACEHOLDER) {
        (
            DEFAULT_SYSTEM_PROMPT.to_string(),
            template.replace(CONTENT_PLACEHOLDER, article_markdown),
        )
    } else {
        (template.to_string(), article_markdown.to_string())
    }
}

/// Wrap the completion in the agent's output template. An empty template
/// passes the completion through unchanged.
pub fn render_output(template: &str, completion: &str) -> String {
    if template.is_empty() {
        completion.to_string()
    } else {
        template.replace(CONTENT_PLACEHOLDER, completion)
    }
}

/// LLM backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiBackend {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// Resolve the chat completions endpoint under `base_url`. The base is
/// treated as a directory whether or not it is written with a trailing
/// slash, so `…/v1` and `…/v1/` resolve the same way.
pub fn completion_endpoint(base_url: &str) -> Result<Url> {
    let mut base = base_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?.join("chat/completions")?)
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let endpoint = completion_endpoint(&config.base_url)?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let system = if system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            system_prompt
        };

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        debug!(model = %self.model, user_len = user_prompt.len(), "requesting completion");
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnricherError::Timeout
                } else {
                    EnricherError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    EnricherError::Auth(format!("LLM backend rejected credentials (HTTP {})", status.as_u16()))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after_secs = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok());
                    EnricherError::RateLimited { retry_after_secs }
                }
                s if s.is_server_error() => EnricherError::Server { status: s.as_u16() },
                s => EnricherError::General(format!("LLM backend returned HTTP {}", s.as_u16())),
            });
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        debug!(response_len = content.len(), "completion received");
        Ok(content)
    }
}

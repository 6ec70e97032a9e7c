//! LLM interface shared by routing, decomposition and summary assembly
//!
//! Components never talk to a provider directly: they hold an [`LlmHandle`]
//! wrapping any [`LlmClient`] implementation together with the configured
//! model, token budget and pricing.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod providers;
pub use providers::{create_client, AnthropicClient, OpenAiCompatibleClient, ProviderType};

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fenced block regex is valid")
});

/// Error type for LLM calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM not configured: {0}")]
    NotConfigured(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
}

/// Text returned by a completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCompletion {
    pub text: String,
    pub tokens_used: u32,
}

/// Accumulated LLM usage for a phase or a whole request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    pub calls: u32,
    pub tokens: u64,
    pub cost: f64,
}

impl LlmUsage {
    pub fn merge(&mut self, other: &LlmUsage) {
        self.calls += other.calls;
        self.tokens += other.tokens;
        self.cost += other.cost;
    }

    pub fn is_empty(&self) -> bool {
        self.calls == 0
    }
}

/// The one interface the core requires from a language model
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<LlmCompletion, LlmError>;
}

/// Configuration for the LLM used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderType,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Price in the caller's currency per 1000 tokens
    #[serde(default = "default_cost_per_1k")]
    pub cost_per_1k_tokens: f64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_cost_per_1k() -> f64 {
    0.002
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            endpoint: None,
            cost_per_1k_tokens: default_cost_per_1k(),
        }
    }
}

/// A configured client: the trait object plus model, budget and pricing
#[derive(Clone)]
pub struct LlmHandle {
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: u32,
    cost_per_1k_tokens: f64,
}

impl std::fmt::Debug for LlmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmHandle")
            .field("client", &self.client.name())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmHandle {
    pub fn new(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            cost_per_1k_tokens: config.cost_per_1k_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one completion, returning the text and the usage it incurred
    pub async fn complete(&self, prompt: &str) -> Result<(LlmCompletion, LlmUsage), LlmError> {
        self.complete_with_budget(prompt, self.max_tokens).await
    }

    pub async fn complete_with_budget(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(LlmCompletion, LlmUsage), LlmError> {
        let start = std::time::Instant::now();
        let completion = self
            .client
            .complete(prompt, &self.model, max_tokens.min(self.max_tokens))
            .await?;

        let usage = LlmUsage {
            calls: 1,
            tokens: u64::from(completion.tokens_used),
            cost: f64::from(completion.tokens_used) / 1000.0 * self.cost_per_1k_tokens,
        };

        tracing::debug!(
            "[LLM] {} completion: {} tokens in {:?}",
            self.client.name(),
            completion.tokens_used,
            start.elapsed()
        );

        Ok((completion, usage))
    }
}

/// Pull the first JSON value out of an LLM reply.
///
/// Handles fenced blocks, bare JSON, and JSON surrounded by prose.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let candidate = FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();

    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (candidate.find(open), candidate.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&candidate[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

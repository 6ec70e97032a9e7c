//! OpenAI chat-completions adapter, also used for Ollama's compatible API

use async_trait::async_trait;
use reqwest::Client;

use super::ProviderType;
use crate::brain::{LlmClient, LlmCompletion, LlmError};

pub(super) const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub(super) const OLLAMA_ENDPOINT: &str = "http://localhost:11434/v1/chat/completions";

/// Client for any OpenAI-compatible chat-completions endpoint
pub struct OpenAiCompatibleClient {
    client: Client,
    provider: ProviderType,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider: ProviderType,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        temperature: f32,
    ) -> Self {
        let endpoint = endpoint.into();
        tracing::info!(
            "[LLM] {} client initialized (endpoint: {}, api key: {})",
            provider,
            endpoint,
            if api_key.is_some() { "set" } else { "none" }
        );

        Self {
            client: Client::new(),
            provider,
            endpoint,
            api_key,
            temperature,
        }
    }

    fn parse_response(json: &serde_json::Value) -> Result<LlmCompletion, LlmError> {
        let text = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::ParseError("No message content in response".to_string()))?;

        let tokens_used = json
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as u32;

        Ok(LlmCompletion {
            text: text.to_string(),
            tokens_used,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        match self.provider {
            ProviderType::Ollama => "ollama",
            _ => "openai",
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<LlmCompletion, LlmError> {
        let payload = serde_json::json!({
            "model": model,
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited {
                    retry_after_ms: None,
                });
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        Self::parse_response(&json)
    }
}

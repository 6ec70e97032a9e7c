//! Anthropic messages API adapter

use async_trait::async_trait;
use reqwest::Client;

use crate::brain::{LlmClient, LlmCompletion, LlmError};

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic API client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    endpoint: String,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, temperature: f32) -> Self {
        tracing::info!("[LLM] Anthropic client initialized with API key");
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
            temperature,
        }
    }

    /// Create with a custom endpoint (proxies, gateways)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn parse_response(json: &serde_json::Value) -> Result<LlmCompletion, LlmError> {
        let blocks = json
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LlmError::ParseError("No content blocks in response".to_string()))?;

        // Text blocks are concatenated in order
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("");

        let usage = json.get("usage");
        let input = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0);
        let output = usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0);

        Ok(LlmCompletion {
            text,
            tokens_used: (input + output) as u32,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<LlmCompletion, LlmError> {
        let payload = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 529 is Anthropic's overloaded status
            if status.as_u16() == 429 || status.as_u16() == 529 {
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

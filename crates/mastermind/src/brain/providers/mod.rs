//! Concrete LLM adapters
//!
//! Each provider implements [`LlmClient`](super::LlmClient); the pipeline
//! never inspects which one it was given.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{LlmClient, LlmConfig, LlmError};

mod anthropic;
mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiCompatibleClient;

/// Supported LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    OpenAI,
    Anthropic,
    /// Ollama local LLM (OpenAI-compatible)
    Ollama,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Anthropic => write!(f, "anthropic"),
            ProviderType::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAI),
            "anthropic" | "claude" => Ok(ProviderType::Anthropic),
            "ollama" => Ok(ProviderType::Ollama),
            _ => Err(format!("Unknown provider type: {}", s)),
        }
    }
}

/// Build the adapter matching `config.provider`.
///
/// Hosted providers need their API key in the environment
/// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`); Ollama needs none.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        ProviderType::OpenAI => {
            let api_key = std::env::var("OPENAI_API_KEY").ok();
            if api_key.is_none() && config.endpoint.is_none() {
                return Err(LlmError::NotConfigured(
                    "OPENAI_API_KEY not found".to_string(),
                ));
            }
            Ok(Arc::new(OpenAiCompatibleClient::new(
                ProviderType::OpenAI,
                config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| openai::OPENAI_ENDPOINT.to_string()),
                api_key,
                config.temperature,
            )))
        }
        ProviderType::Ollama => Ok(Arc::new(OpenAiCompatibleClient::new(
            ProviderType::Ollama,
            config
                .endpoint
                .clone()
                .unwrap_or_else(|| openai::OLLAMA_ENDPOINT.to_string()),
            None,
            config.temperature,
        ))),
        ProviderType::Anthropic => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
                LlmError::NotConfigured("ANTHROPIC_API_KEY not found".to_string())
            })?;
            let mut client = AnthropicClient::new(api_key, config.temperature);
            if let Some(endpoint) = &config.endpoint {
                client = client.with_endpoint(endpoint.clone());
            }
            Ok(Arc::new(client))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!("claude".parse::<ProviderType>(), Ok(ProviderType::Anthropic));
        assert_eq!("OLLAMA".parse::<ProviderType>(), Ok(ProviderType::Ollama));
        assert!("mistral".parse::<ProviderType>().is_err());
        assert_eq!(ProviderType::OpenAI.to_string(), "openai");
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: ProviderType::Ollama,
            ..LlmConfig::default()
        };
        let client = create_client(&config).expect("ollama client");
        assert_eq!(client.name(), "ollama");
    }
}

//! Configuration for the MasterMind pipeline
//!
//! Loaded from a TOML file, from the environment, or both: `from_env` starts
//! from defaults, `load_with_env` starts from a file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    assembly::AssemblerConfig,
    brain::{LlmConfig, ProviderType},
    decomposition::DecomposerConfig,
    planning::PlannerConfig,
    routing::RoutingConfig,
    MastermindError, Result,
};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MastermindConfig {
    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub decomposer: DecomposerConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub assembler: AssemblerConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    /// No LLM is used when absent
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Completed requests kept for statistics
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Bound on the active-task table
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Append completed requests to this JSONL file
    #[serde(default)]
    pub jsonl_path: Option<PathBuf>,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_history() -> usize {
    100
}

fn default_max_active() -> usize {
    1000
}

fn default_event_capacity() -> usize {
    1000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            max_active: default_max_active(),
            jsonl_path: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl MastermindConfig {
    /// Read a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: MastermindConfig = toml::from_str(&content)?;
        config.validate()?;
        tracing::debug!("[MASTERMIND] Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults plus `.env` and `MASTERMIND_*` overrides
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// TOML file plus `.env` and `MASTERMIND_*` overrides
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(path)?.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        dotenv::dotenv().ok();
        self.apply_overrides(|key| std::env::var(key).ok())?;
        self.validate()?;
        Ok(self)
    }

    /// Apply overrides from a key lookup; split out so tests need not touch the process env
    pub(crate) fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(value) = lookup("MASTERMIND_MAX_PARALLEL") {
            self.planner.max_parallel = parse_number("MASTERMIND_MAX_PARALLEL", &value)?;
        }
        if let Some(value) = lookup("MASTERMIND_TIMEOUT_SECS") {
            self.planner.default_timeout_secs = parse_number("MASTERMIND_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("MASTERMIND_DEFAULT_DEPARTMENT") {
            self.routing.default_department = value.trim().to_lowercase();
        }
        if let Some(value) = lookup("MASTERMIND_HISTORY_PATH") {
            self.history.jsonl_path = Some(PathBuf::from(value));
        }

        let provider = lookup("MASTERMIND_LLM_PROVIDER");
        let model = lookup("MASTERMIND_LLM_MODEL");
        let endpoint = lookup("MASTERMIND_LLM_ENDPOINT");
        if provider.is_some() || model.is_some() || endpoint.is_some() {
            let llm = self.llm.get_or_insert_with(LlmConfig::default);
            if let Some(provider) = provider {
                llm.provider = provider
                    .parse::<ProviderType>()
                    .map_err(MastermindError::Config)?;
            }
            if let Some(model) = model {
                llm.model = model;
            }
            if let Some(endpoint) = endpoint {
                llm.endpoint = Some(endpoint);
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.planner.max_parallel == 0 {
            return Err(MastermindError::Config(
                "planner.maxParallel must be at least 1".to_string(),
            ));
        }
        if self.planner.default_timeout_secs == 0 {
            return Err(MastermindError::Config(
                "planner.defaultTimeoutSecs must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("routing.confidenceThreshold", self.routing.confidence_threshold),
            (
                "decomposer.decompositionThreshold",
                self.decomposer.decomposition_threshold,
            ),
            (
                "assembler.lowConfidenceThreshold",
                self.assembler.low_confidence_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MastermindError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.routing.default_department.trim().is_empty() {
            return Err(MastermindError::Config(
                "routing.defaultDepartment must not be empty".to_string(),
            ));
        }
        if self.routing.cache_capacity == 0 || self.routing.cache_prefix_chars == 0 {
            return Err(MastermindError::Config(
                "routing cache capacity and prefix length must be positive".to_string(),
            ));
        }
        if self.history.max_active == 0 || self.history.event_capacity == 0 {
            return Err(MastermindError::Config(
                "history.maxActive and history.eventCapacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MastermindError::Config(format!("{} is not a valid number: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use super::*;
    use crate::assembly::{AssemblyStrategy, OutputFormat};

    #[test]
    fn test_defaults_are_valid() {
        let config = MastermindConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.planner.max_parallel, 3);
        assert_eq!(config.routing.default_department, "general");
        assert_eq!(config.history.max_history, 100);
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[planner]
maxParallel = 5
skipOnFailedDependency = true

[assembler]
defaultStrategy = "best_of"
defaultFormat = "html"

[llm]
provider = "ollama"
model = "llama3"
"#
        )
        .unwrap();

        let config = MastermindConfig::load(file.path()).unwrap();
        assert_eq!(config.planner.max_parallel, 5);
        assert!(config.planner.skip_on_failed_dependency);
        assert_eq!(config.planner.default_timeout_secs, 120);
        assert_eq!(config.assembler.default_strategy, AssemblyStrategy::BestOf);
        assert_eq!(config.assembler.default_format, OutputFormat::Html);
        let llm = config.llm.unwrap();
        assert_eq!(llm.provider, ProviderType::Ollama);
        assert_eq!(llm.model, "llama3");
        assert_eq!(llm.max_tokens, 1024);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[planner]\nmaxParallel = 0\n").unwrap();
        assert!(matches!(
            MastermindConfig::load(file.path()),
            Err(MastermindError::Config(_))
        ));

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "[planner\n").unwrap();
        assert!(matches!(
            MastermindConfig::load(broken.path()),
            Err(MastermindError::Toml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MASTERMIND_MAX_PARALLEL", "7"),
            ("MASTERMIND_DEFAULT_DEPARTMENT", " Support "),
            ("MASTERMIND_LLM_PROVIDER", "anthropic"),
            ("MASTERMIND_HISTORY_PATH", "/tmp/history.jsonl"),
        ]
        .into_iter()
        .collect();

        let mut config = MastermindConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.planner.max_parallel, 7);
        assert_eq!(config.routing.default_department, "support");
        assert_eq!(config.llm.unwrap().provider, ProviderType::Anthropic);
        assert_eq!(
            config.history.jsonl_path,
            Some(PathBuf::from("/tmp/history.jsonl"))
        );
    }

    #[test]
    fn test_bad_env_number_is_config_error() {
        let mut config = MastermindConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "MASTERMIND_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(MastermindError::Config(_))));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = MastermindConfig::default();
        config.routing.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}

//! Task decomposition - turns one request into a dependency graph of subtasks
//!
//! Precedence: forced decomposition skips the complexity gate, then the
//! pattern library, then the LLM, then a fixed fallback skeleton. Every path
//! yields at least one subtask and an acyclic graph.

pub mod complexity;
pub mod decomposer;
pub mod patterns;
pub mod validation;

pub use complexity::ComplexityAnalyzer;
pub use decomposer::TaskDecomposer;
pub use patterns::{DecompositionPattern, PatternLibrary, SubtaskTemplate};
pub use validation::{classify_order, critical_path_secs, validate_subtasks, SubtaskGraphError};

use serde::{Deserialize, Serialize};

use crate::types::Priority;

/// Complexity tiers, ordered from least to most complex
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Trivial,
    Low,
    Medium,
    High,
    Critical,
}

impl ComplexityLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 0.15 => ComplexityLevel::Trivial,
            s if s < 0.3 => ComplexityLevel::Low,
            s if s < 0.5 => ComplexityLevel::Medium,
            s if s < 0.75 => ComplexityLevel::High,
            _ => ComplexityLevel::Critical,
        }
    }

    /// Number of subtasks a request of this complexity usually needs
    pub fn estimated_subtasks(&self) -> usize {
        match self {
            ComplexityLevel::Trivial => 1,
            ComplexityLevel::Low => 2,
            ComplexityLevel::Medium => 3,
            ComplexityLevel::High => 5,
            ComplexityLevel::Critical => 7,
        }
    }
}

/// Result of scoring a request's complexity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAnalysis {
    /// Clipped to [0, 1]
    pub score: f64,
    pub level: ComplexityLevel,
    pub factors: Vec<String>,
    pub should_decompose: bool,
    pub estimated_subtasks: usize,
    /// Pattern whose triggers matched, if any
    pub matched_pattern: Option<String>,
}

/// How subtasks relate in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionOrder {
    Sequential,
    Parallel,
    Mixed,
}

/// Where a decomposition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompositionSource {
    Passthrough,
    Pattern,
    Llm,
    Fallback,
}

/// One unit of decomposed work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    /// Unique within its decomposition
    pub id: String,
    pub sequence: u32,
    pub description: String,
    pub department: String,
    pub agent_type: String,
    /// Ids of sibling subtasks this one waits for
    pub dependencies: Vec<String>,
    pub estimated_duration_secs: u64,
    pub estimated_tokens: u32,
    pub estimated_cost: f64,
    pub priority: Priority,
}

/// Ordered subtask list plus how it was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecompositionResult {
    pub subtasks: Vec<Subtask>,
    pub execution_order: ExecutionOrder,
    pub source: DecompositionSource,
    pub pattern_used: Option<String>,
    /// Pattern match strength, or a fixed value per source
    pub confidence: f64,
    /// Sum of all subtask durations
    pub estimated_duration_secs: u64,
    /// Longest dependency chain, by duration
    pub critical_path_secs: u64,
    pub departments_involved: Vec<String>,
    pub complexity: ComplexityAnalysis,
}

impl DecompositionResult {
    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }
}

/// Decomposer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecomposerConfig {
    /// Minimum complexity score that triggers decomposition
    #[serde(default = "default_decomposition_threshold")]
    pub decomposition_threshold: f64,
    /// Upper bound on subtasks accepted from the LLM
    #[serde(default = "default_max_llm_subtasks")]
    pub max_llm_subtasks: usize,
    /// Used when a subtask carries no duration estimate
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: u64,
    #[serde(default = "default_subtask_tokens")]
    pub default_subtask_tokens: u32,
    #[serde(default = "default_cost_per_1k")]
    pub cost_per_1k_tokens: f64,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
}

fn default_decomposition_threshold() -> f64 {
    0.3
}

fn default_max_llm_subtasks() -> usize {
    8
}

fn default_duration_secs() -> u64 {
    60
}

fn default_subtask_tokens() -> u32 {
    800
}

fn default_cost_per_1k() -> f64 {
    0.002
}

fn default_llm_max_tokens() -> u32 {
    1200
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            decomposition_threshold: default_decomposition_threshold(),
            max_llm_subtasks: default_max_llm_subtasks(),
            default_duration_secs: default_duration_secs(),
            default_subtask_tokens: default_subtask_tokens(),
            cost_per_1k_tokens: default_cost_per_1k(),
            llm_max_tokens: default_llm_max_tokens(),
        }
    }
}

//! Result assembly - combines subtask outputs into one response
//!
//! A strategy builds an [`AssembledBody`]; rendering to a target format is a
//! separate step over that body, so one result can be re-rendered without
//! reassembling.

pub mod assembler;
pub mod coherence;
pub mod render;
pub mod strategies;

pub use assembler::ResultAssembler;
pub use coherence::{check_coherence, CoherenceReport};
pub use render::render;

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::brain::LlmUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStrategy {
    /// Labeled content block per source
    #[default]
    Merge,
    /// Outputs joined with a separator
    Concatenate,
    /// Grouped by department, then by agent
    Structured,
    /// Sectioned by department with per-item confidence
    Hierarchical,
    /// LLM synthesis over successful outputs
    Summary,
    /// Single highest-confidence result
    BestOf,
    /// Every result tagged with its confidence, highest first
    Weighted,
}

impl fmt::Display for AssemblyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyStrategy::Merge => "merge",
            AssemblyStrategy::Concatenate => "concatenate",
            AssemblyStrategy::Structured => "structured",
            AssemblyStrategy::Hierarchical => "hierarchical",
            AssemblyStrategy::Summary => "summary",
            AssemblyStrategy::BestOf => "best_of",
            AssemblyStrategy::Weighted => "weighted",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for AssemblyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "merge" => Ok(AssemblyStrategy::Merge),
            "concatenate" | "concat" => Ok(AssemblyStrategy::Concatenate),
            "structured" => Ok(AssemblyStrategy::Structured),
            "hierarchical" => Ok(AssemblyStrategy::Hierarchical),
            "summary" => Ok(AssemblyStrategy::Summary),
            "best_of" | "best" => Ok(AssemblyStrategy::BestOf),
            "weighted" => Ok(AssemblyStrategy::Weighted),
            _ => Err(format!("Unknown assembly strategy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    #[default]
    Markdown,
    Json,
    Html,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Html => write!(f, "html"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" | "plain" => Ok(OutputFormat::Text),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            "html" => Ok(OutputFormat::Html),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// One piece of content inside a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    /// 1 for top-level sections, 2 for nested ones
    pub level: u8,
    pub blocks: Vec<Block>,
}

impl Section {
    pub fn new(heading: Option<String>, level: u8) -> Self {
        Self {
            heading,
            level,
            blocks: Vec::new(),
        }
    }
}

/// Format-independent output of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledBody {
    pub title: String,
    pub sections: Vec<Section>,
}

/// Per-source provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDetail {
    pub subtask_id: String,
    pub step_id: String,
    pub agent_type: String,
    pub department: String,
    pub success: bool,
    pub confidence: f64,
    pub error: Option<String>,
    pub output_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyResult {
    pub task_id: Uuid,
    /// False when no source succeeded
    pub success: bool,
    pub content: String,
    pub format: OutputFormat,
    pub strategy_requested: AssemblyStrategy,
    pub strategy_used: AssemblyStrategy,
    pub sources_count: usize,
    pub successful_sources: usize,
    pub summary: String,
    pub sources: Vec<SourceDetail>,
    pub body: AssembledBody,
    pub coherence: CoherenceReport,
    /// Mean successful confidence scaled by coherence
    pub confidence: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub llm_usage: LlmUsage,
    pub created_at: DateTime<Utc>,
}

/// Assembler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblerConfig {
    #[serde(default)]
    pub default_strategy: AssemblyStrategy,
    #[serde(default)]
    pub default_format: OutputFormat,
    /// Results below this confidence count as low-confidence
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

fn default_low_confidence_threshold() -> f64 {
    0.5
}

fn default_separator() -> String {
    "\n\n---\n\n".to_string()
}

fn default_summary_max_tokens() -> u32 {
    800
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            default_strategy: AssemblyStrategy::default(),
            default_format: OutputFormat::default(),
            low_confidence_threshold: default_low_confidence_threshold(),
            separator: default_separator(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

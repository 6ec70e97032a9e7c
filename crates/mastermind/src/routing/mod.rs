//! Request routing - classifies a request into a department and lead agent
//!
//! Keyword scoring decides first; a configured LLM is consulted only when the
//! keyword confidence falls below the threshold, and its answer is adopted
//! only when it is more confident.

pub mod departments;
pub mod engine;

pub use departments::{Department, DepartmentRegistry};
pub use engine::RoutingEngine;

use serde::{Deserialize, Serialize};

/// Seniority of an agent within its department
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLevel {
    Director,
    Manager,
    Specialist,
}

/// Identity of the agent a request or subtask is assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub id: String,
    pub name: String,
    pub level: AgentLevel,
}

/// How a routing decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMethod {
    Keyword,
    Llm,
    Forced,
}

/// Outcome of routing a request; produced once and never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResult {
    pub department: String,
    pub department_name: String,
    pub agent: AgentRef,
    /// Always within [0, 1]
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
    pub secondary_departments: Vec<String>,
    pub is_multi_department: bool,
    pub method: RoutingMethod,
    pub reasoning: String,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Below this keyword confidence the LLM is consulted
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Department used when no keyword matches
    #[serde(default = "default_department")]
    pub default_department: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// Number of normalized characters forming the cache key
    #[serde(default = "default_cache_prefix_chars")]
    pub cache_prefix_chars: usize,
    #[serde(default = "default_true")]
    pub llm_fallback: bool,
    /// Token budget for the classification prompt
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
}

fn default_confidence_threshold() -> f64 {
    0.4
}

fn default_department() -> String {
    "general".to_string()
}

fn default_cache_capacity() -> u64 {
    1000
}

fn default_cache_prefix_chars() -> usize {
    200
}

fn default_true() -> bool {
    true
}

fn default_llm_max_tokens() -> u32 {
    200
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            default_department: default_department(),
            cache_capacity: default_cache_capacity(),
            cache_prefix_chars: default_cache_prefix_chars(),
            llm_fallback: true,
            llm_max_tokens: default_llm_max_tokens(),
        }
    }
}

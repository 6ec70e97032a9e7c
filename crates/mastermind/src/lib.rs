//! # MasterMind - Request Orchestration Engine
//!
//! Classifies a business request into a department, decomposes it into a
//! dependency graph of subtasks, runs those subtasks in bounded-concurrency
//! waves against an injected agent executor, and assembles the partial
//! outputs into one response.

pub mod assembly;
pub mod brain;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod decomposition;
pub mod history;
pub mod planning;
pub mod routing;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod coordinator_tests;

pub use assembly::{
    AssembledBody, AssemblerConfig, AssemblyResult, AssemblyStrategy, CoherenceReport,
    OutputFormat, ResultAssembler,
};
pub use brain::{
    create_client, LlmClient, LlmCompletion, LlmConfig, LlmError, LlmHandle, LlmUsage,
    ProviderType,
};
pub use cache::{CacheKey, CacheStats, RoutingCache};
pub use config::{HistoryConfig, MastermindConfig};
pub use coordinator::{
    ActiveTask, ExecutionContext, MasterMind, MasterMindBuilder, MasterMindEvent,
    MasterMindResult, MasterMindStatistics, Phase, ProcessOptions,
};
pub use decomposition::{
    ComplexityAnalysis, ComplexityLevel, DecomposerConfig, DecompositionPattern,
    DecompositionResult, DecompositionSource, ExecutionOrder, PatternLibrary, Subtask,
    TaskDecomposer,
};
pub use history::{HistoryEntry, HistorySink, HistoryStats, JsonlHistorySink};
pub use planning::{
    AgentExecutor, AgentOutput, ExecutionPlan, ExecutionPlanner, ExecutionStep, ExecutorError,
    PlanExecutionResult, PlanOptions, PlannerConfig, SimulatedExecutor, StepContext, StepStatus,
};
pub use routing::{
    AgentLevel, AgentRef, Department, DepartmentRegistry, RoutingConfig, RoutingEngine,
    RoutingMethod, RoutingResult,
};
pub use types::{Priority, Request, RequestContent, SubtaskResult};

/// Main error types for MasterMind operations
#[derive(Debug, thiserror::Error)]
pub enum MastermindError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, MastermindError>;

/// Build a MasterMind instance with the default executor and any LLM the
/// configuration names
pub async fn initialize_mastermind(config: MastermindConfig) -> Result<MasterMind> {
    tracing::info!("[MASTERMIND] Initializing orchestration engine...");

    let mastermind = MasterMind::builder(config).build()?;

    tracing::info!(
        "[MASTERMIND] Initialized with {} departments and {} decomposition patterns",
        mastermind.router().registry().len(),
        mastermind.decomposer().patterns().len()
    );
    Ok(mastermind)
}

//! MasterMind coordinator - runs the fixed phase sequence for each request
//!
//! One [`ExecutionContext`] is owned by the task processing a request. The
//! coordinator only shares the active-task table, the history ring buffer and
//! the event channel across requests.

pub mod mastermind;

pub use mastermind::{MasterMind, MasterMindBuilder};

use std::{collections::BTreeMap, fmt, time::Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    assembly::{AssemblyResult, AssemblyStrategy, OutputFormat},
    brain::LlmUsage,
    cache::CacheStats,
    decomposition::{ComplexityAnalysis, DecompositionResult},
    history::HistoryStats,
    planning::{ExecutionPlan, PlanExecutionResult},
    routing::RoutingResult,
    types::Request,
};

const PREVIEW_CHARS: usize = 80;

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Routing,
    Analysis,
    Decomposition,
    Planning,
    Execution,
    Assembly,
    Validation,
    Complete,
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Routing => "routing",
            Phase::Analysis => "analysis",
            Phase::Decomposition => "decomposition",
            Phase::Planning => "planning",
            Phase::Execution => "execution",
            Phase::Assembly => "assembly",
            Phase::Validation => "validation",
            Phase::Complete => "complete",
            Phase::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Aggregate root for one request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub trace_id: Uuid,
    pub request: Request,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    /// Wall-clock time spent in each phase
    pub phase_durations_ms: BTreeMap<Phase, u64>,
    pub routing: Option<RoutingResult>,
    pub complexity: Option<ComplexityAnalysis>,
    pub decomposition: Option<DecompositionResult>,
    pub plan: Option<ExecutionPlan>,
    pub execution: Option<PlanExecutionResult>,
    pub assembly: Option<AssemblyResult>,
    pub llm_usage: LlmUsage,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    clock: Instant,
    #[serde(skip)]
    phase_clock: Instant,
}

impl ExecutionContext {
    pub fn new(request: Request) -> Self {
        let now = Instant::now();
        Self {
            task_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            request,
            phase: Phase::Init,
            started_at: Utc::now(),
            phase_durations_ms: BTreeMap::new(),
            routing: None,
            complexity: None,
            decomposition: None,
            plan: None,
            execution: None,
            assembly: None,
            llm_usage: LlmUsage::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            clock: now,
            phase_clock: now,
        }
    }

    /// Close the current phase's timer and move to `next`; returns the phase left
    pub fn enter(&mut self, next: Phase) -> Phase {
        let elapsed = self.phase_clock.elapsed().as_millis() as u64;
        *self.phase_durations_ms.entry(self.phase).or_insert(0) += elapsed;
        self.phase_clock = Instant::now();
        std::mem::replace(&mut self.phase, next)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    pub fn department(&self) -> Option<&str> {
        self.routing.as_ref().map(|r| r.department.as_str())
    }

    pub fn snapshot(&self) -> ActiveTask {
        ActiveTask {
            task_id: self.task_id,
            trace_id: self.trace_id,
            phase: self.phase,
            department: self.department().map(str::to_string),
            request_preview: preview(&self.request.analyzable_text()),
            started_at: self.started_at,
        }
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Introspection view of a request in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTask {
    pub task_id: Uuid,
    pub trace_id: Uuid,
    pub phase: Phase,
    pub department: Option<String>,
    pub request_preview: String,
    pub started_at: DateTime<Utc>,
}

/// Events emitted while requests are processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MasterMindEvent {
    TaskStarted {
        task_id: Uuid,
        trace_id: Uuid,
    },
    PhaseChanged {
        task_id: Uuid,
        from: Phase,
        to: Phase,
    },
    StepCompleted {
        task_id: Uuid,
        step_id: String,
        subtask_id: String,
        success: bool,
        duration_ms: u64,
    },
    TaskCompleted {
        task_id: Uuid,
        success: bool,
        department: Option<String>,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Uuid,
        phase: Phase,
        error: String,
    },
}

/// Per-request overrides
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Skip classification and route here at confidence 1.0
    pub force_department: Option<String>,
    /// Decompose even below the complexity threshold
    pub force_decompose: bool,
    pub strategy: Option<AssemblyStrategy>,
    pub format: Option<OutputFormat>,
    pub max_parallel: Option<usize>,
    pub cancellation: Option<CancellationToken>,
}

impl ProcessOptions {
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.force_department = Some(department.into());
        self
    }

    pub fn force_decompose(mut self) -> Self {
        self.force_decompose = true;
        self
    }

    pub fn with_strategy(mut self, strategy: AssemblyStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// What the caller receives for every request, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterMindResult {
    pub task_id: Uuid,
    pub trace_id: Uuid,
    pub success: bool,
    pub department: Option<String>,
    pub agent: Option<String>,
    pub content: String,
    pub format: OutputFormat,
    pub successful_subtasks: usize,
    pub total_subtasks: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Terminal phase reached: `Complete` or `Error`
    pub phase: Phase,
    pub phase_durations_ms: BTreeMap<Phase, u64>,
    pub total_duration_ms: u64,
    pub llm_usage: LlmUsage,
    pub assembly: Option<AssemblyResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterMindStatistics {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub department_counts: BTreeMap<String, usize>,
    pub total_llm_cost: f64,
    pub total_llm_tokens: u64,
    pub active_tasks: usize,
    pub cache: CacheStats,
    pub cache_hit_rate: f64,
}

impl MasterMindStatistics {
    fn new(history: HistoryStats, active_tasks: usize, cache: CacheStats) -> Self {
        Self {
            total_processed: history.total_processed,
            successful: history.successful,
            failed: history.failed,
            success_rate: history.success_rate,
            average_duration_ms: history.average_duration_ms,
            department_counts: history.department_counts,
            total_llm_cost: history.total_llm_cost,
            total_llm_tokens: history.total_llm_tokens,
            active_tasks,
            cache_hit_rate: cache.hit_rate,
            cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_display() {
        assert!(Phase::Init < Phase::Routing);
        assert!(Phase::Assembly < Phase::Validation);
        assert!(Phase::Complete.is_terminal());
        assert!(!Phase::Execution.is_terminal());
        assert_eq!(Phase::Decomposition.to_string(), "decomposition");
    }

    #[test]
    fn test_enter_records_previous_phase() {
        let mut ctx = ExecutionContext::new(Request::text("bonjour"));
        assert_eq!(ctx.enter(Phase::Routing), Phase::Init);
        assert_eq!(ctx.enter(Phase::Analysis), Phase::Routing);

        assert_eq!(ctx.phase, Phase::Analysis);
        assert!(ctx.phase_durations_ms.contains_key(&Phase::Init));
        assert!(ctx.phase_durations_ms.contains_key(&Phase::Routing));
        assert!(!ctx.phase_durations_ms.contains_key(&Phase::Analysis));
    }

    #[test]
    fn test_snapshot_preview_is_truncated() {
        let ctx = ExecutionContext::new(Request::text("x".repeat(200)));
        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.request_preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(snapshot.department.is_none());
        assert_eq!(snapshot.phase, Phase::Init);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = MasterMindEvent::PhaseChanged {
            task_id: Uuid::nil(),
            from: Phase::Routing,
            to: Phase::Analysis,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "phaseChanged");
        assert_eq!(value["to"], "analysis");
    }

    #[test]
    fn test_phase_durations_serialize_as_map() {
        let mut durations = BTreeMap::new();
        durations.insert(Phase::Routing, 3u64);
        let json = serde_json::to_string(&durations).unwrap();
        assert_eq!(json, r#"{"routing":3}"#);
    }
}

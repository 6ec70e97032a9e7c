//! Execution planning - dependency waves, estimates and bounded-concurrency execution

pub mod executor;
pub mod planner;

pub use executor::{
    AgentExecutor, AgentOutput, ExecutorError, PlanExecutionResult, SimulatedExecutor,
    StepCallback, StepContext, StepError, StepErrorKind,
};
pub use planner::ExecutionPlanner;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    decomposition::ExecutionOrder,
    types::{Priority, SubtaskResult},
};

/// Lifecycle of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Runtime wrapper around one subtask
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: String,
    pub subtask_id: String,
    pub sequence: u32,
    pub description: String,
    pub department: String,
    pub agent_type: String,
    pub priority: Priority,
    /// Step ids this step waits for
    pub dependencies: Vec<String>,
    /// Step ids waiting for this step
    pub dependents: Vec<String>,
    pub parallel_group: Option<usize>,
    pub status: StepStatus,
    pub estimated_duration_secs: u64,
    pub estimated_tokens: u32,
    pub estimated_cost: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<SubtaskResult>,
    pub error: Option<String>,
}

/// One wave of steps whose dependencies are all satisfied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelGroup {
    pub index: usize,
    pub step_ids: Vec<String>,
    pub parallelizable: bool,
    /// Steps that were ready when the wave was formed, before the
    /// `max_parallel` cut
    #[serde(default)]
    pub candidates: usize,
    /// Duration of the slowest member
    pub estimated_duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub task_id: Uuid,
    pub trace_id: String,
    pub steps: Vec<ExecutionStep>,
    pub groups: Vec<ParallelGroup>,
    pub execution_order: ExecutionOrder,
    pub options: PlanOptions,
    pub estimated_duration_secs: u64,
    pub estimated_tokens: u64,
    pub estimated_cost: f64,
    /// Deadlock, unknown dependency and overload notes
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn step(&self, id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut ExecutionStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn step_for_subtask(&self, subtask_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.subtask_id == subtask_id)
    }

    /// Steps that no wave could hold
    pub fn unscheduled_steps(&self) -> Vec<&ExecutionStep> {
        self.steps
            .iter()
            .filter(|s| s.parallel_group.is_none())
            .collect()
    }

    pub fn is_fully_scheduled(&self) -> bool {
        self.steps.iter().all(|s| s.parallel_group.is_some())
    }

    pub fn count_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn statistics(&self) -> PlanStatistics {
        let mut departments = BTreeMap::new();
        let mut agents = BTreeMap::new();
        for step in &self.steps {
            *departments.entry(step.department.clone()).or_insert(0) += 1;
            *agents.entry(step.agent_type.clone()).or_insert(0) += 1;
        }

        PlanStatistics {
            total_steps: self.steps.len(),
            wave_count: self.groups.len(),
            max_wave_width: self
                .groups
                .iter()
                .map(|g| g.step_ids.len())
                .max()
                .unwrap_or(0),
            parallel_waves: self.groups.iter().filter(|g| g.parallelizable).count(),
            critical_path_secs: self.critical_path_secs(),
            estimated_duration_secs: self.estimated_duration_secs,
            departments,
            agents,
        }
    }

    /// Longest dependency chain over scheduled steps, ignoring the wave bound
    fn critical_path_secs(&self) -> u64 {
        let mut finish: BTreeMap<&str, u64> = BTreeMap::new();
        for group in &self.groups {
            for id in &group.step_ids {
                let Some(step) = self.step(id) else {
                    continue;
                };
                let start = step
                    .dependencies
                    .iter()
                    .filter_map(|d| finish.get(d.as_str()))
                    .max()
                    .copied()
                    .unwrap_or(0);
                finish.insert(step.id.as_str(), start + step.estimated_duration_secs);
            }
        }
        finish.values().max().copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatistics {
    pub total_steps: usize,
    pub wave_count: usize,
    pub max_wave_width: usize,
    pub parallel_waves: usize,
    pub critical_path_secs: u64,
    pub estimated_duration_secs: u64,
    pub departments: BTreeMap<String, usize>,
    pub agents: BTreeMap<String, usize>,
}

/// Per-plan knobs; defaults come from [`PlannerConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOptions {
    pub max_parallel: usize,
    pub optimize_priority: bool,
    pub group_by_department: bool,
    pub detect_overload: bool,
    pub step_timeout_secs: u64,
    pub skip_on_failed_dependency: bool,
}

impl PlanOptions {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }
}

impl Default for PlanOptions {
    fn default() -> Self {
        PlanOptions::from(&PlannerConfig::default())
    }
}

impl From<&PlannerConfig> for PlanOptions {
    fn from(config: &PlannerConfig) -> Self {
        Self {
            max_parallel: config.max_parallel.max(1),
            optimize_priority: config.optimize_priority,
            group_by_department: config.group_by_department,
            detect_overload: config.detect_overload,
            step_timeout_secs: config.default_timeout_secs,
            skip_on_failed_dependency: config.skip_on_failed_dependency,
        }
    }
}

/// Planner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerConfig {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-step deadline; a step running longer is failed
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub optimize_priority: bool,
    #[serde(default)]
    pub group_by_department: bool,
    #[serde(default = "default_true")]
    pub detect_overload: bool,
    /// Skip dependents of failed steps instead of running them
    #[serde(default)]
    pub skip_on_failed_dependency: bool,
}

fn default_max_parallel() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_timeout_secs: default_timeout_secs(),
            optimize_priority: true,
            group_by_department: false,
            detect_overload: true,
            skip_on_failed_dependency: false,
        }
    }
}

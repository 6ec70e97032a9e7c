//! Plan execution against an injected agent executor

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    decomposition::ExecutionOrder,
    types::{Priority, SubtaskResult},
};

use super::{ExecutionPlan, ExecutionPlanner, ExecutionStep, StepStatus};

/// Error type for agent executor calls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("step timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("step cancelled")]
    Cancelled,

    #[error("no agent available for '{0}'")]
    AgentNotFound(String),
}

/// Everything an agent receives for one step
#[derive(Debug, Clone)]
pub struct StepContext {
    pub task_id: Uuid,
    pub trace_id: String,
    pub step_id: String,
    pub subtask_id: String,
    pub description: String,
    pub department: String,
    pub agent_type: String,
    pub priority: Priority,
    /// Results of direct dependencies only, keyed by subtask id
    pub dependency_results: HashMap<String, SubtaskResult>,
    pub cancellation: CancellationToken,
}

/// What an agent returns for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub success: bool,
    pub output: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: u32,
}

impl AgentOutput {
    pub fn ok(output: serde_json::Value, confidence: f64) -> Self {
        Self {
            success: true,
            output,
            confidence,
            error: None,
            tokens_used: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            confidence: 0.0,
            error: Some(error.into()),
            tokens_used: 0,
        }
    }
}

/// The contract domain agents satisfy; invoked once per step
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, ctx: StepContext) -> Result<AgentOutput, ExecutorError>;
}

/// Produces canned successful output without calling any agent
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor;

impl SimulatedExecutor {
    const CONFIDENCE: f64 = 0.8;

    fn output_for(agent_type: &str, description: &str) -> serde_json::Value {
        serde_json::Value::String(format!(
            "[simulated] {} completed: {}",
            agent_type, description
        ))
    }
}

#[async_trait]
impl AgentExecutor for SimulatedExecutor {
    async fn execute(&self, ctx: StepContext) -> Result<AgentOutput, ExecutorError> {
        Ok(AgentOutput::ok(
            Self::output_for(&ctx.agent_type, &ctx.description),
            Self::CONFIDENCE,
        ))
    }
}

/// Invoked after each step reaches a terminal state
pub type StepCallback = Arc<dyn Fn(&ExecutionStep, &SubtaskResult) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepErrorKind {
    Failed,
    Timeout,
    Cancelled,
    Deadlock,
}

/// One entry of a plan's error list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub step_id: Option<String>,
    pub subtask_id: Option<String>,
    pub kind: StepErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExecutionResult {
    /// True only when every step completed
    pub success: bool,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    /// One per executed step, in step order; failed steps included
    pub results: Vec<SubtaskResult>,
    pub errors: Vec<StepError>,
    pub duration_ms: u64,
}

impl PlanExecutionResult {
    pub fn is_partial(&self) -> bool {
        self.completed > 0 && self.completed < self.total
    }

    fn from_plan(plan: &ExecutionPlan, errors: Vec<StepError>, duration_ms: u64) -> Self {
        let results: Vec<SubtaskResult> =
            plan.steps.iter().filter_map(|s| s.result.clone()).collect();
        let completed = plan.count_status(StepStatus::Completed);
        let total = plan.steps.len();
        PlanExecutionResult {
            success: total > 0 && completed == total,
            completed,
            failed: plan.count_status(StepStatus::Failed),
            skipped: plan.count_status(StepStatus::Skipped),
            total,
            results,
            errors,
            duration_ms,
        }
    }
}

struct StepOutcome {
    step_id: String,
    result: Result<AgentOutput, ExecutorError>,
    started_at: chrono::DateTime<Utc>,
    duration_ms: u64,
}

impl ExecutionPlanner {
    /// Execute a plan wave by wave.
    ///
    /// A failing step is recorded and does not abort its siblings or later waves.
    pub async fn execute_plan(
        &self,
        plan: &mut ExecutionPlan,
        executor: Arc<dyn AgentExecutor>,
        on_step_complete: Option<StepCallback>,
    ) -> PlanExecutionResult {
        self.execute_plan_with_cancel(plan, executor, on_step_complete, CancellationToken::new())
            .await
    }

    pub async fn execute_plan_with_cancel(
        &self,
        plan: &mut ExecutionPlan,
        executor: Arc<dyn AgentExecutor>,
        on_step_complete: Option<StepCallback>,
        cancel: CancellationToken,
    ) -> PlanExecutionResult {
        let start = Instant::now();
        let mut errors = Vec::new();
        let step_timeout = Duration::from_secs(plan.options.step_timeout_secs.max(1));
        let concurrency = match plan.execution_order {
            ExecutionOrder::Sequential => 1,
            _ => plan.options.max_parallel.max(1),
        };

        let groups = plan.groups.clone();
        for group in &groups {
            if cancel.is_cancelled() {
                tracing::warn!(
                    "[PLANNER] Plan {} cancelled before wave {}",
                    plan.plan_id,
                    group.index
                );
                break;
            }

            let mut contexts = Vec::new();
            for step_id in &group.step_ids {
                if let Some(reason) = self.skip_reason(plan, step_id) {
                    if let Some(step) = plan.step_mut(step_id) {
                        tracing::info!("[PLANNER] Skipping {}: {}", step.id, reason);
                        step.status = StepStatus::Skipped;
                        step.error = Some(reason);
                    }
                    continue;
                }
                if let Some(ctx) = build_context(plan, step_id, &cancel) {
                    if let Some(step) = plan.step_mut(step_id) {
                        step.status = StepStatus::Running;
                    }
                    contexts.push(ctx);
                }
            }

            tracing::debug!(
                "[PLANNER] Wave {}: running {} steps (concurrency {})",
                group.index,
                contexts.len(),
                concurrency
            );

            let outcomes: Vec<StepOutcome> = stream::iter(contexts)
                .map(|ctx| spawn_step(executor.clone(), ctx, step_timeout))
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                if let Some((step, result)) = apply_outcome(plan, outcome, &mut errors) {
                    if let Some(callback) = &on_step_complete {
                        callback(&step, &result);
                    }
                }
            }
        }

        // Anything still pending was either cut off by cancellation or never scheduled
        let unscheduled: Vec<String> = plan
            .unscheduled_steps()
            .iter()
            .map(|s| s.subtask_id.clone())
            .collect();
        for step in plan.steps.iter_mut() {
            if !step.status.is_terminal() {
                step.status = StepStatus::Skipped;
            }
        }
        if !unscheduled.is_empty() {
            tracing::error!(
                "[PLANNER] Deadlock: {} steps were never ready ({})",
                unscheduled.len(),
                unscheduled.join(", ")
            );
            errors.push(StepError {
                step_id: None,
                subtask_id: None,
                kind: StepErrorKind::Deadlock,
                message: format!(
                    "Deadlock: {} steps could not be scheduled ({})",
                    unscheduled.len(),
                    unscheduled.join(", ")
                ),
            });
        }

        let result =
            PlanExecutionResult::from_plan(plan, errors, start.elapsed().as_millis() as u64);
        tracing::info!(
            "[PLANNER] Plan {} finished: {}/{} completed, {} failed, {} skipped",
            plan.plan_id,
            result.completed,
            result.total,
            result.failed,
            result.skipped
        );
        result
    }

    /// Walk the waves synchronously, completing every step with simulated output
    pub fn simulate_plan(&self, plan: &mut ExecutionPlan) -> PlanExecutionResult {
        let groups = plan.groups.clone();
        for group in &groups {
            for step_id in &group.step_ids {
                if let Some(step) = plan.step_mut(step_id) {
                    let now = Utc::now();
                    step.started_at = Some(now);
                    step.completed_at = Some(now);
                    step.status = StepStatus::Completed;
                    step.result = Some(
                        SubtaskResult::success(
                            step.subtask_id.clone(),
                            step.department.clone(),
                            step.agent_type.clone(),
                            SimulatedExecutor::output_for(&step.agent_type, &step.description),
                            SimulatedExecutor::CONFIDENCE,
                        )
                        .with_step_id(step.id.clone()),
                    );
                }
            }
        }

        let mut errors = Vec::new();
        let unscheduled: Vec<String> = plan
            .unscheduled_steps()
            .iter()
            .map(|s| s.subtask_id.clone())
            .collect();
        if !unscheduled.is_empty() {
            for step in plan.steps.iter_mut().filter(|s| s.parallel_group.is_none()) {
                step.status = StepStatus::Skipped;
            }
            errors.push(StepError {
                step_id: None,
                subtask_id: None,
                kind: StepErrorKind::Deadlock,
                message: format!(
                    "Deadlock: {} steps could not be scheduled ({})",
                    unscheduled.len(),
                    unscheduled.join(", ")
                ),
            });
        }

        PlanExecutionResult::from_plan(plan, errors, 0)
    }

    fn skip_reason(&self, plan: &ExecutionPlan, step_id: &str) -> Option<String> {
        if !plan.options.skip_on_failed_dependency {
            return None;
        }
        let step = plan.step(step_id)?;
        step.dependencies.iter().find_map(|dep| {
            let dep_step = plan.step(dep)?;
            matches!(dep_step.status, StepStatus::Failed | StepStatus::Skipped).then(|| {
                format!("dependency '{}' did not complete", dep_step.subtask_id)
            })
        })
    }
}

fn build_context(
    plan: &ExecutionPlan,
    step_id: &str,
    cancel: &CancellationToken,
) -> Option<StepContext> {
    let step = plan.step(step_id)?;
    let dependency_results = step
        .dependencies
        .iter()
        .filter_map(|dep| plan.step(dep))
        .filter_map(|dep| dep.result.clone().map(|r| (dep.subtask_id.clone(), r)))
        .collect();

    Some(StepContext {
        task_id: plan.task_id,
        trace_id: plan.trace_id.clone(),
        step_id: step.id.clone(),
        subtask_id: step.subtask_id.clone(),
        description: step.description.clone(),
        department: step.department.clone(),
        agent_type: step.agent_type.clone(),
        priority: step.priority,
        dependency_results,
        cancellation: cancel.child_token(),
    })
}

/// Run one step on its own task so a panicking agent only fails that step
async fn spawn_step(
    executor: Arc<dyn AgentExecutor>,
    ctx: StepContext,
    step_timeout: Duration,
) -> StepOutcome {
    let step_id = ctx.step_id.clone();
    let started_at = Utc::now();
    let start = Instant::now();

    match tokio::spawn(run_step(executor, ctx, step_timeout)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let message = if e.is_panic() {
                format!("agent panicked: {}", panic_message(e.into_panic()))
            } else {
                "step task was aborted".to_string()
            };
            tracing::error!("[PLANNER] Step {} did not finish: {}", step_id, message);
            StepOutcome {
                step_id,
                result: Err(ExecutorError::Failed(message)),
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

async fn run_step(
    executor: Arc<dyn AgentExecutor>,
    ctx: StepContext,
    step_timeout: Duration,
) -> StepOutcome {
    let step_id = ctx.step_id.clone();
    let cancel = ctx.cancellation.clone();
    let started_at = Utc::now();
    let start = Instant::now();

    let result = tokio::select! {
        _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        outcome = tokio::time::timeout(step_timeout, executor.execute(ctx)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout { secs: step_timeout.as_secs() }),
        },
    };

    StepOutcome {
        step_id,
        result,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Record a step's outcome on the plan; returns the step and its result for callbacks
fn apply_outcome(
    plan: &mut ExecutionPlan,
    outcome: StepOutcome,
    errors: &mut Vec<StepError>,
) -> Option<(ExecutionStep, SubtaskResult)> {
    let step = plan.step_mut(&outcome.step_id)?;
    step.started_at = Some(outcome.started_at);
    step.completed_at = Some(Utc::now());

    let (status, result, error) = match outcome.result {
        Ok(output) if output.success => {
            let mut result = SubtaskResult::success(
                step.subtask_id.clone(),
                step.department.clone(),
                step.agent_type.clone(),
                output.output,
                output.confidence,
            );
            result.tokens_used = output.tokens_used;
            (StepStatus::Completed, result, None)
        }
        Ok(output) => {
            let message = output
                .error
                .unwrap_or_else(|| "agent reported failure".to_string());
            let mut result = SubtaskResult::failure(
                step.subtask_id.clone(),
                step.department.clone(),
                step.agent_type.clone(),
                message.clone(),
            );
            result.output = output.output;
            result.tokens_used = output.tokens_used;
            (StepStatus::Failed, result, Some((StepErrorKind::Failed, message)))
        }
        Err(e) => {
            let (status, kind) = match e {
                ExecutorError::Timeout { .. } => (StepStatus::Failed, StepErrorKind::Timeout),
                ExecutorError::Cancelled => (StepStatus::Skipped, StepErrorKind::Cancelled),
                _ => (StepStatus::Failed, StepErrorKind::Failed),
            };
            let message = e.to_string();
            let result = SubtaskResult::failure(
                step.subtask_id.clone(),
                step.department.clone(),
                step.agent_type.clone(),
                message.clone(),
            );
            (status, result, Some((kind, message)))
        }
    };

    let result = SubtaskResult {
        step_id: step.id.clone(),
        duration_ms: outcome.duration_ms,
        ..result
    };

    if let Some((kind, message)) = error {
        tracing::warn!("[PLANNER] Step {} ({}) failed: {}", step.id, step.subtask_id, message);
        errors.push(StepError {
            step_id: Some(step.id.clone()),
            subtask_id: Some(step.subtask_id.clone()),
            kind,
            message: message.clone(),
        });
        step.error = Some(message);
    } else {
        tracing::debug!(
            "[PLANNER] Step {} ({}) completed in {}ms",
            step.id,
            step.subtask_id,
            outcome.duration_ms
        );
    }

    step.status = status;
    // Cancelled steps never produced output
    if status != StepStatus::Skipped {
        step.result = Some(result.clone());
    }
    Some((step.clone(), result))
}

//! Execution planner - turns subtasks into dependency-ordered waves

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
};

use chrono::Utc;
use uuid::Uuid;

use crate::decomposition::{ExecutionOrder, Subtask};

use super::{
    ExecutionPlan, ExecutionStep, ParallelGroup, PlanOptions, PlannerConfig, StepStatus,
};

/// Builds and runs execution plans
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlanner {
    config: PlannerConfig,
}

impl ExecutionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Options derived from this planner's configuration
    pub fn default_options(&self) -> PlanOptions {
        PlanOptions::from(&self.config)
    }

    /// Build a plan: one step per subtask, grouped into waves of at most
    /// `max_parallel` steps. A dependency cycle stops wave construction and
    /// leaves the remaining steps unscheduled.
    pub fn create_plan(
        &self,
        task_id: Uuid,
        trace_id: &str,
        subtasks: &[Subtask],
        options: &PlanOptions,
    ) -> ExecutionPlan {
        let max_parallel = options.max_parallel.max(1);
        let mut warnings = Vec::new();

        let step_ids: HashMap<&str, String> = subtasks
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.id.as_str(), format!("step_{}", idx + 1)))
            .collect();

        let mut steps: Vec<ExecutionStep> = subtasks
            .iter()
            .enumerate()
            .map(|(idx, subtask)| {
                let mut dependencies = Vec::new();
                for dep in &subtask.dependencies {
                    match step_ids.get(dep.as_str()) {
                        Some(step_id) if !dependencies.contains(step_id) => {
                            dependencies.push(step_id.clone())
                        }
                        Some(_) => {}
                        None => {
                            tracing::warn!(
                                "[PLANNER] Subtask '{}' depends on unknown '{}', ignoring",
                                subtask.id,
                                dep
                            );
                            warnings.push(format!(
                                "Unknown dependency '{}' on subtask '{}' ignored",
                                dep, subtask.id
                            ));
                        }
                    }
                }

                ExecutionStep {
                    id: format!("step_{}", idx + 1),
                    subtask_id: subtask.id.clone(),
                    sequence: subtask.sequence,
                    description: subtask.description.clone(),
                    department: subtask.department.clone(),
                    agent_type: subtask.agent_type.clone(),
                    priority: subtask.priority,
                    dependencies,
                    dependents: Vec::new(),
                    parallel_group: None,
                    status: StepStatus::Pending,
                    estimated_duration_secs: subtask.estimated_duration_secs,
                    estimated_tokens: subtask.estimated_tokens,
                    estimated_cost: subtask.estimated_cost,
                    started_at: None,
                    completed_at: None,
                    result: None,
                    error: None,
                }
            })
            .collect();

        // Back-fill dependents
        let edges: Vec<(String, String)> = steps
            .iter()
            .flat_map(|s| s.dependencies.iter().map(|d| (d.clone(), s.id.clone())))
            .collect();
        for (dependency, dependent) in edges {
            if let Some(step) = steps.iter_mut().find(|s| s.id == dependency) {
                step.dependents.push(dependent);
            }
        }

        let groups = self.build_waves(&mut steps, max_parallel, options, &mut warnings);

        if options.detect_overload {
            warnings.extend(detect_overload(&steps));
        }

        let execution_order = classify(&steps, &groups);
        let estimated_duration_secs = groups.iter().map(|g| g.estimated_duration_secs).sum();
        let estimated_tokens = steps.iter().map(|s| u64::from(s.estimated_tokens)).sum();
        let estimated_cost = steps.iter().map(|s| s.estimated_cost).sum();

        tracing::info!(
            "[PLANNER] Plan for task {}: {} steps in {} waves ({:?}, max parallel {})",
            task_id,
            steps.len(),
            groups.len(),
            execution_order,
            max_parallel
        );

        ExecutionPlan {
            plan_id: Uuid::new_v4(),
            task_id,
            trace_id: trace_id.to_string(),
            steps,
            groups,
            execution_order,
            options: PlanOptions {
                max_parallel,
                ..options.clone()
            },
            estimated_duration_secs,
            estimated_tokens,
            estimated_cost,
            warnings,
            created_at: Utc::now(),
        }
    }

    fn build_waves(
        &self,
        steps: &mut [ExecutionStep],
        max_parallel: usize,
        options: &PlanOptions,
        warnings: &mut Vec<String>,
    ) -> Vec<ParallelGroup> {
        let mut groups = Vec::new();
        let mut scheduled: HashSet<String> = HashSet::new();

        while scheduled.len() < steps.len() {
            let mut ready: Vec<usize> = steps
                .iter()
                .enumerate()
                .filter(|(_, s)| !scheduled.contains(&s.id))
                .filter(|(_, s)| s.dependencies.iter().all(|d| scheduled.contains(d)))
                .map(|(idx, _)| idx)
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = steps
                    .iter()
                    .filter(|s| !scheduled.contains(&s.id))
                    .map(|s| s.subtask_id.as_str())
                    .collect();
                tracing::warn!(
                    "[PLANNER] No step is ready while {} remain; likely dependency cycle: {}",
                    stuck.len(),
                    stuck.join(", ")
                );
                warnings.push(format!(
                    "Planning deadlock: {} steps could not be scheduled ({})",
                    stuck.len(),
                    stuck.join(", ")
                ));
                break;
            }

            if options.optimize_priority {
                ready.sort_by_key(|idx| Reverse(steps[*idx].priority));
            }
            if options.group_by_department {
                let mut rank: HashMap<&str, usize> = HashMap::new();
                for idx in &ready {
                    let next = rank.len();
                    rank.entry(steps[*idx].department.as_str()).or_insert(next);
                }
                let ranks: Vec<usize> = ready
                    .iter()
                    .map(|idx| rank[steps[*idx].department.as_str()])
                    .collect();
                let mut ranked: Vec<(usize, usize)> = ranks.into_iter().zip(ready).collect();
                ranked.sort_by_key(|(rank, _)| *rank);
                ready = ranked.into_iter().map(|(_, idx)| idx).collect();
            }

            let candidates = ready.len();
            ready.truncate(max_parallel);

            let index = groups.len();
            let mut step_ids = Vec::with_capacity(ready.len());
            let mut duration = 0;
            for idx in &ready {
                let step = &mut steps[*idx];
                step.parallel_group = Some(index);
                duration = duration.max(step.estimated_duration_secs);
                step_ids.push(step.id.clone());
            }
            scheduled.extend(step_ids.iter().cloned());

            groups.push(ParallelGroup {
                index,
                parallelizable: step_ids.len() > 1,
                candidates,
                step_ids,
                estimated_duration_secs: duration,
            });
        }

        groups
    }
}

/// SEQUENTIAL when no wave holds more than one step, PARALLEL when every wave
/// formed from several ready steps runs them side by side, MIXED otherwise.
/// Waves with a single ready step are forced and do not count.
fn classify(steps: &[ExecutionStep], groups: &[ParallelGroup]) -> ExecutionOrder {
    if steps.len() <= 1 || groups.iter().all(|g| !g.parallelizable) {
        ExecutionOrder::Sequential
    } else if groups
        .iter()
        .filter(|g| g.candidates > 1)
        .all(|g| g.parallelizable)
    {
        ExecutionOrder::Parallel
    } else {
        ExecutionOrder::Mixed
    }
}

/// Flag agents holding more than twice their even share of steps
fn detect_overload(steps: &[ExecutionStep]) -> Vec<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for step in steps {
        match counts.iter_mut().find(|(agent, _)| *agent == step.agent_type) {
            Some((_, count)) => *count += 1,
            None => counts.push((step.agent_type.as_str(), 1)),
        }
    }
    if counts.len() < 2 {
        return Vec::new();
    }

    let even_share = steps.len() as f64 / counts.len() as f64;
    counts
        .into_iter()
        .filter(|(_, count)| *count as f64 > 2.0 * even_share)
        .map(|(agent, count)| {
            tracing::warn!(
                "[PLANNER] Agent '{}' is overloaded: {} of {} steps",
                agent,
                count,
                steps.len()
            );
            format!(
                "Agent '{}' is overloaded with {} of {} steps",
                agent,
                count,
                steps.len()
            )
        })
        .collect()
}

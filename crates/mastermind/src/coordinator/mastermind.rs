//! The MasterMind engine and its builder

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    assembly::ResultAssembler,
    brain::{create_client, LlmClient, LlmHandle},
    config::MastermindConfig,
    decomposition::{DecompositionResult, PatternLibrary, TaskDecomposer},
    history::{HistoryEntry, HistoryLog, HistorySink, JsonlHistorySink},
    planning::{
        AgentExecutor, ExecutionPlan, ExecutionPlanner, ExecutionStep, PlanExecutionResult,
        SimulatedExecutor, StepCallback,
    },
    routing::{DepartmentRegistry, RoutingEngine, RoutingResult},
    types::{Request, SubtaskResult},
    MastermindError, Result,
};

use super::{
    ActiveTask, ExecutionContext, MasterMindEvent, MasterMindResult, MasterMindStatistics, Phase,
    ProcessOptions,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Requests in flight, bounded; the oldest entry is evicted first
struct ActiveTable {
    tasks: HashMap<Uuid, ActiveTask>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl ActiveTable {
    fn new(capacity: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, task: ActiveTask) {
        while self.tasks.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    if self.tasks.remove(&oldest).is_some() {
                        tracing::warn!(
                            "[MASTERMIND] Active task table full ({}), evicted {}",
                            self.capacity,
                            oldest
                        );
                    }
                }
                None => break,
            }
        }
        self.order.push_back(task.task_id);
        self.tasks.insert(task.task_id, task);
    }

    fn update(&mut self, task: ActiveTask) {
        if let Some(existing) = self.tasks.get_mut(&task.task_id) {
            *existing = task;
        }
    }

    fn remove(&mut self, task_id: &Uuid) {
        if self.tasks.remove(task_id).is_some() {
            self.order.retain(|id| id != task_id);
        }
    }

    fn snapshot(&self) -> Vec<ActiveTask> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }
}

/// Wires the components of a [`MasterMind`]
pub struct MasterMindBuilder {
    config: MastermindConfig,
    llm_client: Option<Arc<dyn LlmClient>>,
    executor: Option<Arc<dyn AgentExecutor>>,
    history_sink: Option<Arc<dyn HistorySink>>,
    departments: Option<DepartmentRegistry>,
    patterns: Option<PatternLibrary>,
}

impl MasterMindBuilder {
    fn new(config: MastermindConfig) -> Self {
        Self {
            config,
            llm_client: None,
            executor: None,
            history_sink: None,
            departments: None,
            patterns: None,
        }
    }

    /// Use this client instead of one built from `config.llm`
    pub fn llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    /// Agent executor; defaults to [`SimulatedExecutor`]
    pub fn executor(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// History sink; defaults to a JSONL file when `history.jsonl_path` is set
    pub fn history_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.history_sink = Some(sink);
        self
    }

    pub fn departments(mut self, registry: DepartmentRegistry) -> Self {
        self.departments = Some(registry);
        self
    }

    pub fn patterns(mut self, patterns: PatternLibrary) -> Self {
        self.patterns = Some(patterns);
        self
    }

    pub fn build(self) -> Result<MasterMind> {
        let MasterMindBuilder {
            config,
            llm_client,
            executor,
            history_sink,
            departments,
            patterns,
        } = self;

        config.validate()?;

        let registry = departments.unwrap_or_default();
        if registry.is_empty() {
            return Err(MastermindError::Config(
                "department registry is empty".to_string(),
            ));
        }
        if !registry.contains(&config.routing.default_department) {
            return Err(MastermindError::Config(format!(
                "default department '{}' is not registered",
                config.routing.default_department
            )));
        }

        let llm = match (llm_client, &config.llm) {
            (Some(client), llm_config) => Some(LlmHandle::new(
                client,
                &llm_config.clone().unwrap_or_default(),
            )),
            (None, Some(llm_config)) => match create_client(llm_config) {
                Ok(client) => Some(LlmHandle::new(client, llm_config)),
                Err(e) => {
                    tracing::warn!("[MASTERMIND] LLM unavailable, continuing without it: {}", e);
                    None
                }
            },
            (None, None) => None,
        };

        let mut router = RoutingEngine::new(registry, config.routing.clone());
        let mut decomposer =
            TaskDecomposer::new(config.decomposer.clone(), patterns.unwrap_or_default());
        let mut assembler = ResultAssembler::new(config.assembler.clone());
        if let Some(llm) = llm {
            tracing::info!("[MASTERMIND] LLM enabled (model: {})", llm.model());
            router = router.with_llm(llm.clone());
            decomposer = decomposer.with_llm(llm.clone());
            assembler = assembler.with_llm(llm);
        }

        let history_sink = match (history_sink, &config.history.jsonl_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => {
                Some(Arc::new(JsonlHistorySink::open(path)?) as Arc<dyn HistorySink>)
            }
            (None, None) => None,
        };

        let (event_sender, _) = broadcast::channel(config.history.event_capacity);

        Ok(MasterMind {
            planner: ExecutionPlanner::new(config.planner.clone()),
            active: Mutex::new(ActiveTable::new(config.history.max_active)),
            history: Mutex::new(HistoryLog::new(config.history.max_history)),
            executor: executor
                .unwrap_or_else(|| Arc::new(SimulatedExecutor) as Arc<dyn AgentExecutor>),
            router,
            decomposer,
            assembler,
            history_sink,
            event_sender,
            config,
        })
    }
}

/// Request orchestration engine.
///
/// Construct once and share by reference (or `Arc`) across request handlers;
/// every request gets its own [`ExecutionContext`].
pub struct MasterMind {
    config: MastermindConfig,
    router: RoutingEngine,
    decomposer: TaskDecomposer,
    planner: ExecutionPlanner,
    assembler: ResultAssembler,
    executor: Arc<dyn AgentExecutor>,
    history_sink: Option<Arc<dyn HistorySink>>,
    active: Mutex<ActiveTable>,
    history: Mutex<HistoryLog>,
    event_sender: broadcast::Sender<MasterMindEvent>,
}

impl MasterMind {
    pub fn builder(config: MastermindConfig) -> MasterMindBuilder {
        MasterMindBuilder::new(config)
    }

    pub fn config(&self) -> &MastermindConfig {
        &self.config
    }

    pub fn router(&self) -> &RoutingEngine {
        &self.router
    }

    pub fn decomposer(&self) -> &TaskDecomposer {
        &self.decomposer
    }

    pub fn planner(&self) -> &ExecutionPlanner {
        &self.planner
    }

    pub fn assembler(&self) -> &ResultAssembler {
        &self.assembler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MasterMindEvent> {
        self.event_sender.subscribe()
    }

    /// Requests currently in flight, oldest first
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        lock(&self.active).snapshot()
    }

    /// Most recent completed requests, newest first
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        lock(&self.history).recent(limit)
    }

    pub fn statistics(&self) -> MasterMindStatistics {
        let history = lock(&self.history).stats();
        let active = lock(&self.active).tasks.len();
        MasterMindStatistics::new(history, active, self.router.cache_stats())
    }

    /// Run the full pipeline with real LLM and agent calls.
    ///
    /// Never fails: unexpected errors end the request in [`Phase::Error`]
    /// and are reported on the returned result.
    pub async fn process(&self, request: Request, options: ProcessOptions) -> MasterMindResult {
        let mut ctx = ExecutionContext::new(request);
        let span = tracing::info_span!(
            "mastermind",
            task_id = %ctx.task_id,
            trace_id = %ctx.trace_id,
            department = tracing::field::Empty
        );

        async move {
            self.begin(&ctx);
            let cancel = options
                .cancellation
                .clone()
                .unwrap_or_else(CancellationToken::new);
            let outcome = self.run_phases(&mut ctx, &options, &cancel).await;
            self.finish(ctx, &options, outcome)
        }
        .instrument(span)
        .await
    }

    /// Run the pipeline without an async runtime: keyword routing,
    /// pattern-only decomposition, simulated execution, no LLM calls.
    pub fn process_sync(&self, request: Request, options: ProcessOptions) -> MasterMindResult {
        let mut ctx = ExecutionContext::new(request);
        let span = tracing::info_span!(
            "mastermind",
            task_id = %ctx.task_id,
            trace_id = %ctx.trace_id,
            department = tracing::field::Empty,
            mode = "sync"
        );
        let _entered = span.enter();

        self.begin(&ctx);
        let cancel = options
            .cancellation
            .clone()
            .unwrap_or_else(CancellationToken::new);
        let outcome = self.run_phases_sync(&mut ctx, &options, &cancel);
        self.finish(ctx, &options, outcome)
    }

    async fn run_phases(
        &self,
        ctx: &mut ExecutionContext,
        options: &ProcessOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.advance(ctx, Phase::Routing, cancel)?;
        let (routing, usage) = self
            .router
            .route_with_usage(&ctx.request, options.force_department.as_deref())
            .await;
        ctx.llm_usage.merge(&usage);
        self.record_routing(ctx, routing);

        self.advance(ctx, Phase::Analysis, cancel)?;
        ctx.complexity = Some(self.decomposer.analyze_complexity(&ctx.request));

        self.advance(ctx, Phase::Decomposition, cancel)?;
        let (decomposition, usage) = match &ctx.routing {
            Some(routing) => {
                self.decomposer
                    .decompose_with_usage(&ctx.request, routing, options.force_decompose)
                    .await
            }
            None => return Err(MastermindError::Planning("routing result missing".to_string())),
        };
        ctx.llm_usage.merge(&usage);

        self.advance(ctx, Phase::Planning, cancel)?;
        let mut plan = self.plan(ctx, &decomposition, options)?;
        ctx.decomposition = Some(decomposition);

        self.advance(ctx, Phase::Execution, cancel)?;
        let execution = self
            .planner
            .execute_plan_with_cancel(
                &mut plan,
                self.executor.clone(),
                Some(self.step_callback(ctx.task_id)),
                cancel.child_token(),
            )
            .await;
        let results = self.record_execution(ctx, plan, execution);

        self.advance(ctx, Phase::Assembly, cancel)?;
        let assembly = self
            .assembler
            .assemble(
                ctx.task_id,
                &results,
                &ctx.request.analyzable_text(),
                options.strategy,
                options.format,
            )
            .await;
        ctx.llm_usage.merge(&assembly.llm_usage);
        ctx.assembly = Some(assembly);

        self.advance(ctx, Phase::Validation, cancel)?;
        self.validate(ctx);
        Ok(())
    }

    fn run_phases_sync(
        &self,
        ctx: &mut ExecutionContext,
        options: &ProcessOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.advance(ctx, Phase::Routing, cancel)?;
        let routing = self
            .router
            .route_sync(&ctx.request, options.force_department.as_deref());
        self.record_routing(ctx, routing);

        self.advance(ctx, Phase::Analysis, cancel)?;
        ctx.complexity = Some(self.decomposer.analyze_complexity(&ctx.request));

        self.advance(ctx, Phase::Decomposition, cancel)?;
        let decomposition = match &ctx.routing {
            Some(routing) => {
                self.decomposer
                    .decompose_sync(&ctx.request, routing, options.force_decompose)
            }
            None => return Err(MastermindError::Planning("routing result missing".to_string())),
        };

        self.advance(ctx, Phase::Planning, cancel)?;
        let mut plan = self.plan(ctx, &decomposition, options)?;
        ctx.decomposition = Some(decomposition);

        self.advance(ctx, Phase::Execution, cancel)?;
        let execution = self.planner.simulate_plan(&mut plan);
        for step in &plan.steps {
            if let Some(result) = &step.result {
                self.emit_step(ctx.task_id, step, result);
            }
        }
        let results = self.record_execution(ctx, plan, execution);

        self.advance(ctx, Phase::Assembly, cancel)?;
        let assembly = self.assembler.assemble_sync(
            ctx.task_id,
            &results,
            &ctx.request.analyzable_text(),
            options.strategy,
            options.format,
        );
        ctx.assembly = Some(assembly);

        self.advance(ctx, Phase::Validation, cancel)?;
        self.validate(ctx);
        Ok(())
    }

    fn begin(&self, ctx: &ExecutionContext) {
        tracing::info!(
            "[MASTERMIND] Processing task {} (trace {})",
            ctx.task_id,
            ctx.trace_id
        );
        lock(&self.active).insert(ctx.snapshot());
        self.emit(MasterMindEvent::TaskStarted {
            task_id: ctx.task_id,
            trace_id: ctx.trace_id,
        });
    }

    fn advance(
        &self,
        ctx: &mut ExecutionContext,
        next: Phase,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(MastermindError::Cancelled);
        }
        let from = ctx.enter(next);
        tracing::debug!("[MASTERMIND] Task {}: {} -> {}", ctx.task_id, from, next);
        lock(&self.active).update(ctx.snapshot());
        self.emit(MasterMindEvent::PhaseChanged {
            task_id: ctx.task_id,
            from,
            to: next,
        });
        Ok(())
    }

    fn record_routing(&self, ctx: &mut ExecutionContext, routing: RoutingResult) {
        tracing::Span::current().record("department", routing.department.as_str());
        if routing.is_multi_department {
            ctx.warnings.push(format!(
                "Request also touches: {}",
                routing.secondary_departments.join(", ")
            ));
        }
        ctx.routing = Some(routing);
        lock(&self.active).update(ctx.snapshot());
    }

    fn plan(
        &self,
        ctx: &mut ExecutionContext,
        decomposition: &DecompositionResult,
        options: &ProcessOptions,
    ) -> Result<ExecutionPlan> {
        if decomposition.is_empty() {
            return Err(MastermindError::Planning(
                "decomposition produced no subtasks".to_string(),
            ));
        }

        let mut plan_options = self.planner.default_options();
        if let Some(max_parallel) = options.max_parallel {
            plan_options = plan_options.with_max_parallel(max_parallel);
        }

        let plan = self.planner.create_plan(
            ctx.task_id,
            &ctx.trace_id.to_string(),
            &decomposition.subtasks,
            &plan_options,
        );
        ctx.warnings.extend(plan.warnings.iter().cloned());
        Ok(plan)
    }

    /// Store the executed plan on the context; returns the results to assemble
    fn record_execution(
        &self,
        ctx: &mut ExecutionContext,
        plan: ExecutionPlan,
        execution: PlanExecutionResult,
    ) -> Vec<SubtaskResult> {
        for error in &execution.errors {
            let message = match &error.subtask_id {
                Some(subtask_id) => format!("{}: {}", subtask_id, error.message),
                None => error.message.clone(),
            };
            ctx.errors.push(message);
        }
        let results = execution.results.clone();
        ctx.plan = Some(plan);
        ctx.execution = Some(execution);
        results
    }

    /// Post-assembly checks; findings become warnings
    fn validate(&self, ctx: &mut ExecutionContext) {
        if let Some(plan) = &ctx.plan {
            for step in &plan.steps {
                let Some(group) = step.parallel_group else {
                    continue;
                };
                let ordered = step.dependencies.iter().all(|dep| {
                    plan.step(dep)
                        .and_then(|d| d.parallel_group)
                        .is_some_and(|g| g < group)
                });
                if !ordered {
                    ctx.warnings.push(format!(
                        "Step {} was scheduled before one of its dependencies",
                        step.id
                    ));
                }
            }
        }

        if let Some(assembly) = &ctx.assembly {
            if !assembly.success {
                ctx.errors
                    .push("No subtask produced a successful result".to_string());
            }
            ctx.warnings.extend(assembly.warnings.iter().cloned());
            if !assembly.coherence.coherent {
                ctx.warnings.push(format!(
                    "Assembled response is incoherent (confidence {:.2})",
                    assembly.coherence.confidence
                ));
            }
        }
    }

    fn step_callback(&self, task_id: Uuid) -> StepCallback {
        let sender = self.event_sender.clone();
        Arc::new(move |step: &ExecutionStep, result: &SubtaskResult| {
            let _ = sender.send(step_event(task_id, step, result));
        })
    }

    fn emit_step(&self, task_id: Uuid, step: &ExecutionStep, result: &SubtaskResult) {
        self.emit(step_event(task_id, step, result));
    }

    fn emit(&self, event: MasterMindEvent) {
        // No subscribers is fine
        let _ = self.event_sender.send(event);
    }

    fn finish(
        &self,
        mut ctx: ExecutionContext,
        options: &ProcessOptions,
        outcome: Result<()>,
    ) -> MasterMindResult {
        let failed_in = ctx.phase;
        let fatal = outcome.err();
        match &fatal {
            Some(e) => {
                tracing::error!(
                    "[MASTERMIND] Task {} failed during {}: {}",
                    ctx.task_id,
                    failed_in,
                    e
                );
                ctx.errors.push(e.to_string());
                ctx.enter(Phase::Error);
            }
            None => {
                ctx.enter(Phase::Complete);
            }
        }

        let success = fatal.is_none() && ctx.assembly.as_ref().is_some_and(|a| a.success);
        let total_duration_ms = ctx.elapsed_ms();
        let total_subtasks = ctx.decomposition.as_ref().map_or(0, |d| d.len());
        let successful_subtasks = ctx.execution.as_ref().map_or(0, |e| e.completed);

        let entry = HistoryEntry {
            task_id: ctx.task_id,
            trace_id: ctx.trace_id,
            success,
            department: ctx.department().map(str::to_string),
            agent: ctx.routing.as_ref().map(|r| r.agent.id.clone()),
            total_subtasks,
            successful_subtasks,
            duration_ms: total_duration_ms,
            llm_usage: ctx.llm_usage,
            error_count: ctx.errors.len(),
            started_at: ctx.started_at,
            completed_at: chrono::Utc::now(),
        };
        self.record_history(entry);
        lock(&self.active).remove(&ctx.task_id);

        match &fatal {
            Some(e) => self.emit(MasterMindEvent::TaskFailed {
                task_id: ctx.task_id,
                phase: failed_in,
                error: e.to_string(),
            }),
            None => self.emit(MasterMindEvent::TaskCompleted {
                task_id: ctx.task_id,
                success,
                department: ctx.department().map(str::to_string),
                duration_ms: total_duration_ms,
            }),
        }

        tracing::info!(
            "[MASTERMIND] Task {} finished in {}ms: success={}, {}/{} subtasks, {} errors",
            ctx.task_id,
            total_duration_ms,
            success,
            successful_subtasks,
            total_subtasks,
            ctx.errors.len()
        );

        let format = ctx
            .assembly
            .as_ref()
            .map(|a| a.format)
            .or(options.format)
            .unwrap_or(self.config.assembler.default_format);

        MasterMindResult {
            task_id: ctx.task_id,
            trace_id: ctx.trace_id,
            success,
            department: ctx.department().map(str::to_string),
            agent: ctx.routing.as_ref().map(|r| r.agent.id.clone()),
            content: ctx
                .assembly
                .as_ref()
                .map(|a| a.content.clone())
                .unwrap_or_default(),
            format,
            successful_subtasks,
            total_subtasks,
            errors: ctx.errors,
            warnings: ctx.warnings,
            phase: ctx.phase,
            phase_durations_ms: ctx.phase_durations_ms,
            total_duration_ms,
            llm_usage: ctx.llm_usage,
            assembly: ctx.assembly,
        }
    }

    fn record_history(&self, entry: HistoryEntry) {
        if let Some(sink) = &self.history_sink {
            if let Err(e) = sink.append(&entry) {
                tracing::warn!(
                    "[MASTERMIND] Failed to persist history for {}: {}",
                    entry.task_id,
                    e
                );
            }
        }
        lock(&self.history).push(entry);
    }
}

fn step_event(task_id: Uuid, step: &ExecutionStep, result: &SubtaskResult) -> MasterMindEvent {
    MasterMindEvent::StepCompleted {
        task_id,
        step_id: step.id.clone(),
        subtask_id: step.subtask_id.clone(),
        success: result.success,
        duration_ms: result.duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn task(n: u128) -> ActiveTask {
        ActiveTask {
            task_id: Uuid::from_u128(n),
            trace_id: Uuid::from_u128(n),
            phase: Phase::Init,
            department: None,
            request_preview: format!("request {}", n),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_active_table_evicts_oldest() {
        let mut table = ActiveTable::new(2);
        table.insert(task(1));
        table.insert(task(2));
        table.insert(task(3));

        let ids: Vec<Uuid> = table.snapshot().iter().map(|t| t.task_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(2), Uuid::from_u128(3)]);
    }

    #[test]
    fn test_active_table_update_and_remove() {
        let mut table = ActiveTable::new(10);
        table.insert(task(1));
        table.insert(task(2));

        let mut moved = task(1);
        moved.phase = Phase::Execution;
        table.update(moved);
        // Unknown ids are ignored
        table.update(task(9));

        assert_eq!(table.snapshot()[0].phase, Phase::Execution);
        assert_eq!(table.snapshot().len(), 2);

        table.remove(&Uuid::from_u128(1));
        assert_eq!(table.snapshot().len(), 1);
        assert_eq!(table.order.len(), 1);
    }

    #[test]
    fn test_build_rejects_unknown_default_department() {
        let mut config = MastermindConfig::default();
        config.routing.default_department = "astrology".to_string();
        assert!(matches!(
            MasterMind::builder(config).build(),
            Err(MastermindError::Config(_))
        ));
    }
}

//! Tests for the MasterMind coordinator

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::{
        assembly::{AssemblyStrategy, OutputFormat},
        brain::{LlmClient, LlmCompletion, LlmError},
        config::MastermindConfig,
        coordinator::{MasterMind, MasterMindEvent, Phase, ProcessOptions},
        decomposition::DecompositionSource,
        history::HistoryEntry,
        planning::{AgentExecutor, AgentOutput, ExecutorError, StepContext},
        types::Request,
    };

    const SCENARIO_A: &str = "Rénovation complète cuisine et salle de bain, devis et plan";

    /// Fails the listed subtasks, optionally sleeping before answering
    #[derive(Default)]
    struct ScriptedExecutor {
        fail: HashSet<String>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn failing(ids: &[&str]) -> Self {
            Self {
                fail: ids.iter().map(|s| s.to_string()).collect(),
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                fail: HashSet::new(),
                delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn execute(&self, ctx: StepContext) -> Result<AgentOutput, ExecutorError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.contains(&ctx.subtask_id) {
                return Ok(AgentOutput::failed("supplier catalogue offline"));
            }
            Ok(AgentOutput::ok(
                json!(format!("{} done by {}", ctx.subtask_id, ctx.agent_type)),
                0.9,
            ))
        }
    }

    /// Panics on one subtask, answers normally for the rest
    struct PanickingExecutor;

    #[async_trait]
    impl AgentExecutor for PanickingExecutor {
        async fn execute(&self, ctx: StepContext) -> Result<AgentOutput, ExecutorError> {
            if ctx.subtask_id == "estimate_labor" {
                panic!("agent bug");
            }
            Ok(AgentOutput::ok(json!(format!("{} done", ctx.subtask_id)), 0.9))
        }
    }

    struct SummaryLlm;

    #[async_trait]
    impl LlmClient for SummaryLlm {
        fn name(&self) -> &str {
            "summary"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _model: &str,
            _max_tokens: u32,
        ) -> Result<LlmCompletion, LlmError> {
            Ok(LlmCompletion {
                text: "Synthesized estimate: 18 500 EUR over six weeks.".to_string(),
                tokens_used: 250,
            })
        }
    }

    fn mastermind_with(executor: ScriptedExecutor) -> MasterMind {
        MasterMind::builder(MastermindConfig::default())
            .executor(Arc::new(executor))
            .build()
            .unwrap()
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<MasterMindEvent>) -> Vec<MasterMindEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_process_construction_estimate() {
        let mastermind = mastermind_with(ScriptedExecutor::default());

        let result = mastermind
            .process(Request::text(SCENARIO_A), ProcessOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.phase, Phase::Complete);
        assert_eq!(result.department.as_deref(), Some("construction"));
        assert_eq!(result.total_subtasks, 5);
        assert_eq!(result.successful_subtasks, 5);
        assert!(result.errors.is_empty());
        assert_eq!(result.format, OutputFormat::Markdown);
        assert!(result.content.contains("compile_estimate done by"));

        for phase in [
            Phase::Init,
            Phase::Routing,
            Phase::Analysis,
            Phase::Decomposition,
            Phase::Planning,
            Phase::Execution,
            Phase::Assembly,
            Phase::Validation,
        ] {
            assert!(result.phase_durations_ms.contains_key(&phase), "missing {}", phase);
        }

        let assembly = result.assembly.unwrap();
        assert_eq!(assembly.sources_count, 5);
        assert_eq!(assembly.successful_sources, 5);
        assert!(mastermind.active_tasks().is_empty());
        assert_eq!(mastermind.recent_history(10).len(), 1);
    }

    #[test]
    fn test_process_sync_passthrough() {
        let mastermind = mastermind_with(ScriptedExecutor::default());

        let result = mastermind.process_sync(Request::text("bonjour"), ProcessOptions::default());

        assert!(result.success);
        assert_eq!(result.department.as_deref(), Some("general"));
        assert_eq!(result.agent.as_deref(), Some("general-assistant"));
        assert_eq!(result.total_subtasks, 1);
        assert_eq!(result.successful_subtasks, 1);
        assert!(result.llm_usage.is_empty());
        assert!(result.content.contains("[simulated]"));
    }

    #[test]
    fn test_process_sync_uses_patterns() {
        let mastermind = mastermind_with(ScriptedExecutor::default());

        let result = mastermind.process_sync(
            Request::text(SCENARIO_A),
            ProcessOptions::default().with_format(OutputFormat::Json),
        );

        assert!(result.success);
        assert_eq!(result.total_subtasks, 5);
        assert_eq!(result.format, OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert!(parsed["sections"].is_array());
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_not_raised() {
        let mastermind = mastermind_with(ScriptedExecutor::failing(&["price_materials"]));

        let result = mastermind
            .process(Request::text(SCENARIO_A), ProcessOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.phase, Phase::Complete);
        assert_eq!(result.successful_subtasks, 4);
        assert_eq!(result.total_subtasks, 5);
        assert_eq!(
            result.errors,
            vec!["price_materials: supplier catalogue offline".to_string()]
        );

        let assembly = result.assembly.unwrap();
        assert_eq!(assembly.errors, vec!["supplier catalogue offline".to_string()]);
        assert_eq!(assembly.sources_count, 5);
        assert_eq!(assembly.successful_sources, 4);
    }

    #[tokio::test]
    async fn test_panicking_agent_is_reported_as_step_failure() {
        let mastermind = MasterMind::builder(MastermindConfig::default())
            .executor(Arc::new(PanickingExecutor))
            .build()
            .unwrap();

        let result = mastermind
            .process(Request::text(SCENARIO_A), ProcessOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.phase, Phase::Complete);
        assert_eq!(result.successful_subtasks, 4);
        assert_eq!(result.total_subtasks, 5);
        assert_eq!(
            result.errors,
            vec!["estimate_labor: agent panicked: agent bug".to_string()]
        );
        assert!(result.content.contains("compile_estimate done"));
        assert!(mastermind.active_tasks().is_empty());
        assert_eq!(mastermind.statistics().total_processed, 1);
    }

    #[tokio::test]
    async fn test_total_failure_still_returns_result() {
        let mastermind = mastermind_with(ScriptedExecutor::failing(&["handle_request"]));

        let result = mastermind
            .process(Request::text("bonjour"), ProcessOptions::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.phase, Phase::Complete);
        assert!(result
            .errors
            .contains(&"No subtask produced a successful result".to_string()));
        assert!(!result.content.is_empty());

        let stats = mastermind.statistics();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_forced_department() {
        let mastermind = mastermind_with(ScriptedExecutor::default());

        let result = mastermind
            .process(
                Request::text(SCENARIO_A),
                ProcessOptions::default().with_department("legal"),
            )
            .await;

        assert_eq!(result.department.as_deref(), Some("legal"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_ends_in_error() {
        let mastermind = mastermind_with(ScriptedExecutor::default());
        let mut rx = mastermind.subscribe();
        let token = CancellationToken::new();
        token.cancel();

        let result = mastermind
            .process(
                Request::text(SCENARIO_A),
                ProcessOptions::default().with_cancellation(token),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.phase, Phase::Error);
        assert!(result.department.is_none());
        assert_eq!(result.errors, vec!["Request cancelled".to_string()]);

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(MasterMindEvent::TaskFailed { phase: Phase::Init, .. })
        ));
        assert!(mastermind.active_tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_execution() {
        let mastermind = mastermind_with(ScriptedExecutor::slow(Duration::from_secs(60)));
        let mut rx = mastermind.subscribe();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = mastermind
            .process(
                Request::text(SCENARIO_A),
                ProcessOptions::default().with_cancellation(token),
            )
            .await;

        assert_eq!(result.phase, Phase::Error);
        assert!(!result.success);
        assert_eq!(result.successful_subtasks, 0);
        assert!(result.errors.contains(&"Request cancelled".to_string()));

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(MasterMindEvent::TaskFailed { phase: Phase::Execution, .. })
        ));
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let mastermind = mastermind_with(ScriptedExecutor::default());
        let mut rx = mastermind.subscribe();

        let result = mastermind
            .process(Request::text(SCENARIO_A), ProcessOptions::default())
            .await;
        let events = drain(&mut rx);

        assert!(matches!(
            events.first(),
            Some(MasterMindEvent::TaskStarted { task_id, .. }) if *task_id == result.task_id
        ));
        assert!(matches!(
            events.last(),
            Some(MasterMindEvent::TaskCompleted { success: true, .. })
        ));

        let steps = events
            .iter()
            .filter(|e| matches!(e, MasterMindEvent::StepCompleted { .. }))
            .count();
        assert_eq!(steps, 5);

        let phases: Vec<Phase> = events
            .iter()
            .filter_map(|e| match e {
                MasterMindEvent::PhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::Routing,
                Phase::Analysis,
                Phase::Decomposition,
                Phase::Planning,
                Phase::Execution,
                Phase::Assembly,
                Phase::Validation,
            ]
        );
    }

    #[tokio::test]
    async fn test_summary_strategy_accumulates_llm_usage() {
        let mastermind = MasterMind::builder(MastermindConfig::default())
            .llm_client(Arc::new(SummaryLlm))
            .executor(Arc::new(ScriptedExecutor::default()))
            .build()
            .unwrap();

        let result = mastermind
            .process(
                Request::text(SCENARIO_A),
                ProcessOptions::default().with_strategy(AssemblyStrategy::Summary),
            )
            .await;

        assert!(result.success);
        assert!(result.content.contains("Synthesized estimate"));
        assert_eq!(result.llm_usage.calls, 1);
        assert_eq!(result.llm_usage.tokens, 250);
        assert_eq!(
            result.assembly.as_ref().map(|a| a.strategy_used),
            Some(AssemblyStrategy::Summary)
        );

        let stats = mastermind.statistics();
        assert_eq!(stats.total_llm_tokens, 250);
    }

    #[tokio::test]
    async fn test_statistics_and_cache_hits() {
        let mastermind = mastermind_with(ScriptedExecutor::default());

        mastermind
            .process(Request::text(SCENARIO_A), ProcessOptions::default())
            .await;
        mastermind
            .process(Request::text(SCENARIO_A), ProcessOptions::default())
            .await;
        mastermind.process_sync(Request::text("bonjour"), ProcessOptions::default());

        let stats = mastermind.statistics();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.successful, 3);
        assert!((stats.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(stats.department_counts.get("construction"), Some(&2));
        assert_eq!(stats.department_counts.get("general"), Some(&1));
        assert_eq!(stats.cache.hits, 1);
        assert_eq!(stats.active_tasks, 0);
    }

    #[tokio::test]
    async fn test_history_is_persisted_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let mut config = MastermindConfig::default();
        config.history.jsonl_path = Some(path.clone());

        let mastermind = MasterMind::builder(config).build().unwrap();
        let result = mastermind
            .process(Request::text("bonjour"), ProcessOptions::default())
            .await;

        let content = std::fs::read_to_string(&path).unwrap();
        let entry: HistoryEntry = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry.task_id, result.task_id);
        assert_eq!(entry.department.as_deref(), Some("general"));
        assert!(entry.success);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_engine() {
        let mastermind = Arc::new(mastermind_with(ScriptedExecutor::default()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let mastermind = mastermind.clone();
                tokio::spawn(async move {
                    let text = if i % 2 == 0 { SCENARIO_A } else { "bonjour" };
                    mastermind
                        .process(Request::text(text), ProcessOptions::default())
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().success);
        }
        assert_eq!(mastermind.statistics().total_processed, 4);
        assert!(mastermind.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_force_decompose_uses_fallback_skeleton() {
        let mastermind = mastermind_with(ScriptedExecutor::default());
        let request = Request::text("Please prepare the quarterly supplier review for the team");

        let result = mastermind
            .process(request.clone(), ProcessOptions::default().force_decompose())
            .await;

        let decomposition = mastermind.decomposer().decompose_sync(
            &request,
            &mastermind.router().route_sync(&request, None),
            true,
        );
        assert_eq!(result.total_subtasks, decomposition.len());
        assert_ne!(decomposition.source, DecompositionSource::Passthrough);
    }
}

//! End-to-end checks through the public API

use std::sync::Arc;

use async_trait::async_trait;
use mastermind::{
    AgentExecutor, AgentOutput, AssemblerConfig, AssemblyStrategy, DecompositionSource,
    ExecutionOrder, ExecutionPlanner, ExecutorError, MasterMind, MastermindConfig, OutputFormat,
    PlanOptions, PlannerConfig, Priority, ProcessOptions, Request, ResultAssembler, RoutingMethod,
    StepContext, Subtask, SubtaskResult,
};
use serde_json::json;
use uuid::Uuid;

const SCENARIO_A: &str = "Rénovation complète cuisine et salle de bain, devis et plan";

struct EchoExecutor;

#[async_trait]
impl AgentExecutor for EchoExecutor {
    async fn execute(&self, ctx: StepContext) -> Result<AgentOutput, ExecutorError> {
        let inputs: Vec<String> = ctx.dependency_results.keys().cloned().collect();
        Ok(AgentOutput::ok(
            json!(format!("{} (inputs: {})", ctx.subtask_id, inputs.len())),
            0.85,
        ))
    }
}

fn engine() -> MasterMind {
    MasterMind::builder(MastermindConfig::default())
        .executor(Arc::new(EchoExecutor))
        .build()
        .expect("default configuration builds")
}

fn independent(id: &str) -> Subtask {
    Subtask {
        id: id.to_string(),
        sequence: 1,
        description: format!("Independent task {}", id),
        department: "operations".to_string(),
        agent_type: "operations-manager".to_string(),
        dependencies: Vec::new(),
        estimated_duration_secs: 30,
        estimated_tokens: 500,
        estimated_cost: 0.001,
        priority: Priority::Normal,
    }
}

#[tokio::test]
async fn scenario_a_renovation_estimate() {
    let mastermind = engine();
    let request = Request::text(SCENARIO_A);

    let routing = mastermind.router().route(&request, None).await;
    assert_eq!(routing.department, "construction");
    assert!(routing.confidence >= 0.6);
    assert_eq!(routing.method, RoutingMethod::Keyword);

    let decomposition = mastermind
        .decomposer()
        .decompose(&request, &routing, false)
        .await;
    assert_eq!(decomposition.source, DecompositionSource::Pattern);
    assert_eq!(decomposition.pattern_used.as_deref(), Some("construction_estimate"));

    let ids: Vec<&str> = decomposition.subtasks.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "analyze_scope",
            "measure_quantities",
            "estimate_labor",
            "price_materials",
            "compile_estimate"
        ]
    );
    let deps = |id: &str| decomposition.subtask(id).unwrap().dependencies.clone();
    assert!(deps("analyze_scope").is_empty());
    assert_eq!(deps("measure_quantities"), vec!["analyze_scope"]);
    assert_eq!(deps("estimate_labor"), vec!["measure_quantities"]);
    assert_eq!(deps("price_materials"), vec!["measure_quantities"]);
    let mut last = deps("compile_estimate");
    last.sort();
    assert_eq!(last, vec!["estimate_labor", "price_materials"]);

    // Full pipeline: labor and materials run side by side with both inputs forwarded
    let result = mastermind.process(request, ProcessOptions::default()).await;
    assert!(result.success);
    assert_eq!(result.total_subtasks, 5);
    assert!(result.content.contains("compile_estimate (inputs: 2)"));
}

#[tokio::test]
async fn scenario_b_greeting_passthrough() {
    let mastermind = engine();
    let request = Request::text("bonjour");

    let routing = mastermind.router().route(&request, None).await;
    assert_eq!(routing.department, "general");
    assert!((routing.confidence - 0.3).abs() < 1e-9);

    let decomposition = mastermind
        .decomposer()
        .decompose(&request, &routing, false)
        .await;
    assert_eq!(decomposition.len(), 1);
    assert_eq!(decomposition.source, DecompositionSource::Passthrough);
}

#[test]
fn scenario_c_bounded_waves() {
    let planner = ExecutionPlanner::new(PlannerConfig::default());
    let subtasks = vec![independent("a"), independent("b"), independent("c")];
    let options = PlanOptions::default().with_max_parallel(2);

    let plan = planner.create_plan(Uuid::new_v4(), "trace", &subtasks, &options);

    let sizes: Vec<usize> = plan.groups.iter().map(|g| g.step_ids.len()).collect();
    assert_eq!(sizes, vec![2, 1]);
    assert_eq!(plan.execution_order, ExecutionOrder::Parallel);
    assert_eq!(plan.estimated_duration_secs, 60);
}

#[tokio::test]
async fn scenario_d_merge_with_one_failure() {
    let assembler = ResultAssembler::new(AssemblerConfig::default());
    let results = vec![
        SubtaskResult::success(
            "draft_offer",
            "sales",
            "sales-director",
            json!("Offer drafted"),
            0.9,
        ),
        SubtaskResult::success("check_margin", "finance", "cfo", json!("Margin 32%"), 0.8),
        SubtaskResult::failure("book_meeting", "sales", "scheduler", "agent unavailable"),
    ];

    let assembly = assembler
        .assemble(
            Uuid::new_v4(),
            &results,
            "Prepare the client offer",
            Some(AssemblyStrategy::Merge),
            None,
        )
        .await;

    assert!(assembly.success);
    assert_eq!(assembly.sources_count, 3);
    assert_eq!(assembly.successful_sources, 2);
    assert_eq!(assembly.errors, vec!["agent unavailable".to_string()]);

    // Re-rendering changes content only
    let html = assembler.rerender(&assembly, OutputFormat::Html);
    assert_eq!(html.sources_count, 3);
    assert_eq!(html.successful_sources, 2);
    assert_ne!(html.content, assembly.content);
}

#[tokio::test]
async fn routing_is_deterministic() {
    let mastermind = engine();
    let request = Request::text("Préparer le budget et la facture du trimestre");

    let first = mastermind.router().route(&request, None).await;
    let second = mastermind.router().route(&request, None).await;

    assert_eq!(first, second);
    assert!(mastermind
        .router()
        .registry()
        .contains(&first.department));
    assert!((0.0..=1.0).contains(&first.confidence));
    assert_eq!(mastermind.router().cache_stats().hits, 1);
}

#[test]
fn sync_entry_point_without_runtime() {
    let mastermind = engine();

    let result = mastermind.process_sync(
        Request::text(SCENARIO_A),
        ProcessOptions::default().with_format(OutputFormat::Text),
    );

    assert!(result.success);
    assert_eq!(result.total_subtasks, 5);
    assert_eq!(result.format, OutputFormat::Text);
    assert!(result.llm_usage.is_empty());
}

//! Task decomposer - pattern library first, LLM second, fixed skeleton last

use std::collections::HashSet;

use serde_json::Value;

use crate::{
    brain::{extract_json, LlmError, LlmHandle, LlmUsage},
    routing::RoutingResult,
    types::{Priority, Request},
};

use super::{
    classify_order, critical_path_secs, patterns::PatternMatch, validate_subtasks,
    ComplexityAnalysis, ComplexityAnalyzer, ComplexityLevel, DecomposerConfig,
    DecompositionResult, DecompositionSource, ExecutionOrder, PatternLibrary, Subtask,
};

const LLM_CONFIDENCE: f64 = 0.7;
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Outcome of the LLM-free stages
enum Stage {
    Done(DecompositionResult),
    NeedsLlm(ComplexityAnalysis),
}

/// Splits requests into dependency-annotated subtasks
pub struct TaskDecomposer {
    config: DecomposerConfig,
    patterns: PatternLibrary,
    analyzer: ComplexityAnalyzer,
    llm: Option<LlmHandle>,
}

impl TaskDecomposer {
    pub fn new(config: DecomposerConfig, patterns: PatternLibrary) -> Self {
        let analyzer = ComplexityAnalyzer::new(config.decomposition_threshold);
        Self {
            config,
            patterns,
            analyzer,
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: LlmHandle) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn patterns(&self) -> &PatternLibrary {
        &self.patterns
    }

    pub fn analyze_complexity(&self, request: &Request) -> ComplexityAnalysis {
        self.analyze_text(&request.analyzable_text())
    }

    fn analyze_text(&self, text: &str) -> ComplexityAnalysis {
        let matched = self.patterns.best_match(text);
        self.analyzer
            .analyze(text, matched.map(|m| m.pattern.name.as_str()))
    }

    /// Decompose a request; always yields at least one subtask
    pub async fn decompose(
        &self,
        request: &Request,
        routing: &RoutingResult,
        force_decompose: bool,
    ) -> DecompositionResult {
        self.decompose_with_usage(request, routing, force_decompose)
            .await
            .0
    }

    pub async fn decompose_with_usage(
        &self,
        request: &Request,
        routing: &RoutingResult,
        force_decompose: bool,
    ) -> (DecompositionResult, LlmUsage) {
        let text = request.analyzable_text();
        let complexity = match self.decompose_without_llm(&text, routing, force_decompose) {
            Stage::Done(result) => return (result, LlmUsage::default()),
            Stage::NeedsLlm(complexity) => complexity,
        };

        let mut usage = LlmUsage::default();
        if let Some(llm) = &self.llm {
            match self.llm_decompose(llm, &text, routing).await {
                Ok((Some(subtasks), call_usage)) => {
                    usage.merge(&call_usage);
                    tracing::info!(
                        "[DECOMPOSER] LLM produced {} subtasks for '{}'",
                        subtasks.len(),
                        routing.department
                    );
                    let order = classify_order(&subtasks);
                    let result = self.build_result(
                        subtasks,
                        order,
                        DecompositionSource::Llm,
                        None,
                        LLM_CONFIDENCE,
                        complexity,
                    );
                    return (result, usage);
                }
                Ok((None, call_usage)) => {
                    usage.merge(&call_usage);
                    tracing::warn!("[DECOMPOSER] Malformed LLM decomposition, using fallback");
                }
                Err(e) => {
                    tracing::warn!("[DECOMPOSER] LLM decomposition failed, using fallback: {}", e);
                }
            }
        }

        (self.fallback(&text, routing, complexity), usage)
    }

    /// Pattern-only decomposition; never calls the LLM
    pub fn decompose_sync(
        &self,
        request: &Request,
        routing: &RoutingResult,
        force_decompose: bool,
    ) -> DecompositionResult {
        let text = request.analyzable_text();
        match self.decompose_without_llm(&text, routing, force_decompose) {
            Stage::Done(result) => result,
            Stage::NeedsLlm(complexity) => self.fallback(&text, routing, complexity),
        }
    }

    fn decompose_without_llm(
        &self,
        text: &str,
        routing: &RoutingResult,
        force_decompose: bool,
    ) -> Stage {
        let matched = self.patterns.best_match(text);
        let complexity = self
            .analyzer
            .analyze(text, matched.map(|m| m.pattern.name.as_str()));

        if !force_decompose && !complexity.should_decompose {
            tracing::debug!(
                "[DECOMPOSER] Complexity {:.2} below threshold, passing through",
                complexity.score
            );
            return Stage::Done(self.passthrough(text, routing, complexity));
        }

        if let Some(found) = matched {
            let subtasks = self.from_pattern(&found);
            match validate_subtasks(&subtasks) {
                Ok(()) => {
                    tracing::info!(
                        "[DECOMPOSER] Applied pattern '{}' ({} matches, {} subtasks)",
                        found.pattern.name,
                        found.matches,
                        subtasks.len()
                    );
                    return Stage::Done(self.build_result(
                        subtasks,
                        found.pattern.execution_order,
                        DecompositionSource::Pattern,
                        Some(found.pattern.name.clone()),
                        found.confidence,
                        complexity,
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        "[DECOMPOSER] Pattern '{}' is not a valid graph: {}",
                        found.pattern.name,
                        e
                    );
                }
            }
        }

        Stage::NeedsLlm(complexity)
    }

    fn from_pattern(&self, found: &PatternMatch<'_>) -> Vec<Subtask> {
        found
            .pattern
            .subtasks
            .iter()
            .enumerate()
            .map(|(idx, template)| Subtask {
                id: template.id.clone(),
                sequence: idx as u32 + 1,
                description: template.description.clone(),
                department: template
                    .department
                    .clone()
                    .unwrap_or_else(|| found.pattern.department.clone()),
                agent_type: template.agent_type.clone(),
                dependencies: template.dependencies.clone(),
                estimated_duration_secs: if template.duration_secs > 0 {
                    template.duration_secs
                } else {
                    self.config.default_duration_secs
                },
                estimated_tokens: template.estimated_tokens,
                estimated_cost: self.cost_of(template.estimated_tokens),
                priority: template.priority,
            })
            .collect()
    }

    fn passthrough(
        &self,
        text: &str,
        routing: &RoutingResult,
        complexity: ComplexityAnalysis,
    ) -> DecompositionResult {
        let subtask = self.subtask(
            "handle_request",
            1,
            text,
            routing,
            &routing.agent.id,
            Vec::new(),
            Priority::Normal,
        );
        self.build_result(
            vec![subtask],
            ExecutionOrder::Sequential,
            DecompositionSource::Passthrough,
            None,
            1.0,
            complexity,
        )
    }

    fn fallback(
        &self,
        text: &str,
        routing: &RoutingResult,
        complexity: ComplexityAnalysis,
    ) -> DecompositionResult {
        if complexity.level == ComplexityLevel::Trivial {
            return self.passthrough(text, routing, complexity);
        }

        tracing::info!("[DECOMPOSER] Using analyze/execute/validate fallback");
        let subtasks = vec![
            self.subtask(
                "analyze_request",
                1,
                &format!("Analyze the request: {}", text),
                routing,
                "analyst",
                Vec::new(),
                Priority::High,
            ),
            self.subtask(
                "execute_request",
                2,
                &format!("Carry out the request: {}", text),
                routing,
                &routing.agent.id,
                vec!["analyze_request".to_string()],
                Priority::Normal,
            ),
            self.subtask(
                "validate_result",
                3,
                "Validate the result against the request",
                routing,
                "reviewer",
                vec!["execute_request".to_string()],
                Priority::Normal,
            ),
        ];

        self.build_result(
            subtasks,
            ExecutionOrder::Sequential,
            DecompositionSource::Fallback,
            None,
            FALLBACK_CONFIDENCE,
            complexity,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn subtask(
        &self,
        id: &str,
        sequence: u32,
        description: &str,
        routing: &RoutingResult,
        agent_type: &str,
        dependencies: Vec<String>,
        priority: Priority,
    ) -> Subtask {
        Subtask {
            id: id.to_string(),
            sequence,
            description: description.to_string(),
            department: routing.department.clone(),
            agent_type: agent_type.to_string(),
            dependencies,
            estimated_duration_secs: self.config.default_duration_secs,
            estimated_tokens: self.config.default_subtask_tokens,
            estimated_cost: self.cost_of(self.config.default_subtask_tokens),
            priority,
        }
    }

    fn cost_of(&self, tokens: u32) -> f64 {
        f64::from(tokens) / 1000.0 * self.config.cost_per_1k_tokens
    }

    fn build_result(
        &self,
        subtasks: Vec<Subtask>,
        execution_order: ExecutionOrder,
        source: DecompositionSource,
        pattern_used: Option<String>,
        confidence: f64,
        complexity: ComplexityAnalysis,
    ) -> DecompositionResult {
        let mut departments_involved: Vec<String> = Vec::new();
        for subtask in &subtasks {
            if !departments_involved.contains(&subtask.department) {
                departments_involved.push(subtask.department.clone());
            }
        }

        DecompositionResult {
            estimated_duration_secs: subtasks.iter().map(|s| s.estimated_duration_secs).sum(),
            critical_path_secs: critical_path_secs(&subtasks),
            subtasks,
            execution_order,
            source,
            pattern_used,
            confidence,
            departments_involved,
            complexity,
        }
    }

    async fn llm_decompose(
        &self,
        llm: &LlmHandle,
        text: &str,
        routing: &RoutingResult,
    ) -> Result<(Option<Vec<Subtask>>, LlmUsage), LlmError> {
        let prompt = self.build_decomposition_prompt(text, routing);
        let (completion, usage) = llm
            .complete_with_budget(&prompt, self.config.llm_max_tokens)
            .await?;
        Ok((self.parse_llm_subtasks(&completion.text, routing), usage))
    }

    fn build_decomposition_prompt(&self, text: &str, routing: &RoutingResult) -> String {
        format!(
            "You are planning work for the {} department.\n\
             Break the following request into at most {} subtasks.\n\n\
             Request:\n\"{}\"\n\n\
             Respond with a JSON array only. Each item:\n\
             {{\"id\": \"snake_case_id\", \"description\": \"...\", \"agent_type\": \"...\", \
             \"priority\": \"low|normal|high|critical\", \"dependencies\": [\"<earlier id>\"], \
             \"estimated_duration_secs\": 60}}\n\
             Dependencies may only reference ids of other items in the array.",
            routing.department_name, self.config.max_llm_subtasks, text
        )
    }

    /// Parse and validate the LLM's subtask list; `None` means malformed
    fn parse_llm_subtasks(&self, reply: &str, routing: &RoutingResult) -> Option<Vec<Subtask>> {
        let json = extract_json(reply)?;
        let items = match &json {
            Value::Array(items) => items,
            Value::Object(map) => map.get("subtasks")?.as_array()?,
            _ => return None,
        };
        if items.is_empty() {
            return None;
        }

        let all_ids: HashSet<&str> = items
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .collect();

        let mut subtasks = Vec::new();
        for (idx, item) in items.iter().take(self.config.max_llm_subtasks).enumerate() {
            let id = item.get("id")?.as_str()?.trim().to_string();
            let description = item.get("description")?.as_str()?.trim().to_string();
            if description.is_empty() {
                return None;
            }

            let agent_type = item
                .get("agent_type")
                .or_else(|| item.get("agentType"))
                .and_then(Value::as_str)
                .unwrap_or(routing.agent.id.as_str())
                .to_string();
            let dependencies = item
                .get("dependencies")
                .and_then(Value::as_array)
                .map(|deps| {
                    deps.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let duration = item
                .get("estimated_duration_secs")
                .and_then(Value::as_u64)
                .filter(|d| *d > 0)
                .unwrap_or(self.config.default_duration_secs);
            let tokens = self.config.default_subtask_tokens;

            subtasks.push(Subtask {
                id,
                sequence: idx as u32 + 1,
                description,
                department: routing.department.clone(),
                agent_type,
                dependencies,
                estimated_duration_secs: duration,
                estimated_tokens: tokens,
                estimated_cost: self.cost_of(tokens),
                priority: item
                    .get("priority")
                    .map(Priority::parse_lenient)
                    .unwrap_or_default(),
            });
        }

        // Edges into items cut by the subtask bound are dropped; unknown ids
        // stay and fail validation
        let kept: HashSet<String> = subtasks.iter().map(|s| s.id.clone()).collect();
        for subtask in &mut subtasks {
            subtask
                .dependencies
                .retain(|d| kept.contains(d) || !all_ids.contains(d.as_str()));
        }

        match validate_subtasks(&subtasks) {
            Ok(()) => Some(subtasks),
            Err(e) => {
                tracing::warn!("[DECOMPOSER] Rejected LLM subtask graph: {}", e);
                None
            }
        }
    }
}

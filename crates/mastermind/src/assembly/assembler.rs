//! Result assembler - strategy, rendering and coherence in one pass

use chrono::Utc;
use uuid::Uuid;

use crate::{
    brain::{LlmError, LlmHandle, LlmUsage},
    types::SubtaskResult,
};

use super::{
    check_coherence, render,
    strategies::{build_body, summary_body},
    AssembledBody, AssemblerConfig, AssemblyResult, AssemblyStrategy, OutputFormat,
    SourceDetail,
};

const TITLE_CHARS: usize = 80;

/// Combines subtask outputs into one response; never fails
pub struct ResultAssembler {
    config: AssemblerConfig,
    llm: Option<LlmHandle>,
}

impl ResultAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config, llm: None }
    }

    pub fn with_llm(mut self, llm: LlmHandle) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assemble results, calling the LLM for the `Summary` strategy
    pub async fn assemble(
        &self,
        task_id: Uuid,
        results: &[SubtaskResult],
        original_request: &str,
        strategy: Option<AssemblyStrategy>,
        format: Option<OutputFormat>,
    ) -> AssemblyResult {
        let requested = strategy.unwrap_or(self.config.default_strategy);
        let title = title_for(original_request);
        let mut warnings = Vec::new();
        let mut usage = LlmUsage::default();

        let (body, used) = if requested == AssemblyStrategy::Summary {
            match self.summarize(results, original_request).await {
                Ok(Some((summary, call_usage))) => {
                    usage.merge(&call_usage);
                    (summary_body(&title, &summary), AssemblyStrategy::Summary)
                }
                Ok(None) => {
                    warnings
                        .push("No LLM configured for summary; concatenated instead".to_string());
                    self.degraded_body(&title, results)
                }
                Err(e) => {
                    tracing::warn!("[ASSEMBLER] Summary failed, concatenating instead: {}", e);
                    warnings.push(format!("Summary failed ({}); concatenated instead", e));
                    self.degraded_body(&title, results)
                }
            }
        } else {
            (
                build_body(requested, &title, results, &self.config.separator),
                requested,
            )
        };

        self.finish(task_id, results, body, requested, used, format, warnings, usage)
    }

    /// Assemble without any LLM call; `Summary` degrades to `Concatenate`
    pub fn assemble_sync(
        &self,
        task_id: Uuid,
        results: &[SubtaskResult],
        original_request: &str,
        strategy: Option<AssemblyStrategy>,
        format: Option<OutputFormat>,
    ) -> AssemblyResult {
        let requested = strategy.unwrap_or(self.config.default_strategy);
        let title = title_for(original_request);
        let mut warnings = Vec::new();

        let (body, used) = if requested == AssemblyStrategy::Summary {
            warnings.push(
                "Summary is unavailable without an LLM call; concatenated instead".to_string(),
            );
            self.degraded_body(&title, results)
        } else {
            (
                build_body(requested, &title, results, &self.config.separator),
                requested,
            )
        };

        self.finish(
            task_id,
            results,
            body,
            requested,
            used,
            format,
            warnings,
            LlmUsage::default(),
        )
    }

    /// Render an existing result in another format; counts are untouched
    pub fn rerender(&self, result: &AssemblyResult, format: OutputFormat) -> AssemblyResult {
        AssemblyResult {
            content: render(&result.body, format),
            format,
            ..result.clone()
        }
    }

    fn degraded_body(
        &self,
        title: &str,
        results: &[SubtaskResult],
    ) -> (AssembledBody, AssemblyStrategy) {
        (
            build_body(AssemblyStrategy::Concatenate, title, results, &self.config.separator),
            AssemblyStrategy::Concatenate,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        task_id: Uuid,
        results: &[SubtaskResult],
        mut body: AssembledBody,
        requested: AssemblyStrategy,
        used: AssemblyStrategy,
        format: Option<OutputFormat>,
        mut warnings: Vec<String>,
        llm_usage: LlmUsage,
    ) -> AssemblyResult {
        let format = format.unwrap_or(self.config.default_format);
        let coherence = check_coherence(results, self.config.low_confidence_threshold);
        warnings.extend(coherence.issues.iter().cloned());

        let successes: Vec<&SubtaskResult> = results.iter().filter(|r| r.success).collect();
        let mut errors: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                r.error
                    .clone()
                    .unwrap_or_else(|| format!("Subtask '{}' failed", r.subtask_id))
            })
            .collect();

        if successes.is_empty() {
            errors.push("No subtask produced a successful result".to_string());
            // Kept on the result so rerender shows the same notice
            if body.sections.iter().all(|s| s.blocks.is_empty()) {
                body = no_result_body(&body.title, results.len());
            }
        }
        let content = render(&body, format);

        let mean_confidence = if successes.is_empty() {
            0.0
        } else {
            successes.iter().map(|r| r.confidence).sum::<f64>() / successes.len() as f64
        };

        let mut departments: Vec<&str> = Vec::new();
        for result in &successes {
            if !departments.contains(&result.department.as_str()) {
                departments.push(result.department.as_str());
            }
        }
        let summary = if departments.is_empty() {
            format!("0 of {} subtasks succeeded", results.len())
        } else {
            format!(
                "{} of {} subtasks succeeded ({}), assembled with {}",
                successes.len(),
                results.len(),
                departments.join(", "),
                used
            )
        };

        let sources = results
            .iter()
            .map(|r| SourceDetail {
                subtask_id: r.subtask_id.clone(),
                step_id: r.step_id.clone(),
                agent_type: r.agent_type.clone(),
                department: r.department.clone(),
                success: r.success,
                confidence: r.confidence,
                error: r.error.clone(),
                output_chars: r.output_text().chars().count(),
            })
            .collect();

        tracing::info!(
            "[ASSEMBLER] Task {}: {}/{} sources via {} as {} (coherence {:.2})",
            task_id,
            successes.len(),
            results.len(),
            used,
            format,
            coherence.confidence
        );

        AssemblyResult {
            task_id,
            success: !successes.is_empty(),
            content,
            format,
            strategy_requested: requested,
            strategy_used: used,
            sources_count: results.len(),
            successful_sources: successes.len(),
            summary,
            sources,
            body,
            confidence: (mean_confidence * coherence.confidence).clamp(0.0, 1.0),
            coherence,
            errors,
            warnings,
            llm_usage,
            created_at: Utc::now(),
        }
    }

    /// `Ok(None)` when no LLM is configured or there is nothing to summarize
    async fn summarize(
        &self,
        results: &[SubtaskResult],
        original_request: &str,
    ) -> Result<Option<(String, LlmUsage)>, LlmError> {
        let Some(llm) = &self.llm else {
            return Ok(None);
        };

        let outputs: Vec<String> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| format!("- [{} / {}] {}", r.department, r.agent_type, r.output_text()))
            .collect();
        if outputs.is_empty() {
            return Ok(None);
        }

        let prompt = format!(
            "Synthesize the following partial results into one coherent answer to the \
             original request. Keep concrete figures, drop repetition, do not invent facts.\n\n\
             Original request:\n\"{}\"\n\nPartial results:\n{}\n\nAnswer:",
            original_request,
            outputs.join("\n")
        );

        let (completion, usage) = llm
            .complete_with_budget(&prompt, self.config.summary_max_tokens)
            .await?;
        if completion.text.trim().is_empty() {
            return Err(LlmError::ParseError("empty summary".to_string()));
        }
        Ok(Some((completion.text, usage)))
    }
}

fn title_for(original_request: &str) -> String {
    let trimmed = original_request.trim();
    if trimmed.is_empty() {
        return "Response".to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_CHARS).collect();
    if trimmed.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    title
}

fn no_result_body(title: &str, total: usize) -> AssembledBody {
    summary_body(
        title,
        &format!(
            "No result could be produced: all {} subtasks failed. See errors for details.",
            total
        ),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::brain::{LlmClient, LlmCompletion, LlmConfig};

    struct FixedLlm(Option<&'static str>);

    #[async_trait]
    impl LlmClient for FixedLlm {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _model: &str,
            _max_tokens: u32,
        ) -> Result<LlmCompletion, LlmError> {
            match self.0 {
                Some(text) => Ok(LlmCompletion {
                    text: text.to_string(),
                    tokens_used: 300,
                }),
                None => Err(LlmError::RateLimited {
                    retry_after_ms: Some(1000),
                }),
            }
        }
    }

    fn two_successes_one_failure() -> Vec<SubtaskResult> {
        vec![
            SubtaskResult::success(
                "estimate_labor",
                "construction",
                "labor_estimator",
                json!("40 hours"),
                0.8,
            ),
            SubtaskResult::success(
                "price_materials",
                "construction",
                "materials_pricer",
                json!("3200 EUR"),
                0.9,
            ),
            SubtaskResult::failure(
                "compile_estimate",
                "construction",
                "estimator",
                "agent unavailable",
            ),
        ]
    }

    fn assembler() -> ResultAssembler {
        ResultAssembler::new(AssemblerConfig::default())
    }

    fn assembler_with_llm(reply: Option<&'static str>) -> ResultAssembler {
        let handle = LlmHandle::new(Arc::new(FixedLlm(reply)), &LlmConfig::default());
        assembler().with_llm(handle)
    }

    #[tokio::test]
    async fn test_merge_with_one_failure() {
        let result = assembler()
            .assemble(
                Uuid::new_v4(),
                &two_successes_one_failure(),
                "devis cuisine",
                Some(AssemblyStrategy::Merge),
                None,
            )
            .await;

        assert!(result.success);
        assert_eq!(result.sources_count, 3);
        assert_eq!(result.successful_sources, 2);
        assert_eq!(result.errors, vec!["agent unavailable".to_string()]);
        assert_eq!(result.format, OutputFormat::Markdown);
        assert!(result.content.contains("40 hours"));
        assert!(result.content.contains("3200 EUR"));
        assert!(result.coherence.coherent);
        assert!((result.confidence - 0.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rerender_keeps_counts() {
        let assembler = assembler();
        let original = assembler
            .assemble(
                Uuid::new_v4(),
                &two_successes_one_failure(),
                "devis cuisine",
                Some(AssemblyStrategy::Hierarchical),
                Some(OutputFormat::Markdown),
            )
            .await;

        for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::Html] {
            let rerendered = assembler.rerender(&original, format);
            assert_eq!(rerendered.format, format);
            assert_eq!(rerendered.sources_count, original.sources_count);
            assert_eq!(rerendered.successful_sources, original.successful_sources);
            assert_eq!(rerendered.errors, original.errors);
            assert_ne!(rerendered.content, original.content);
        }
    }

    #[tokio::test]
    async fn test_zero_successes_returns_failed_result() {
        let failures = vec![
            SubtaskResult::failure("a", "general", "agent", "boom"),
            SubtaskResult::failure("b", "general", "agent", "bang"),
        ];
        let result = assembler()
            .assemble(Uuid::new_v4(), &failures, "anything", None, Some(OutputFormat::Text))
            .await;

        assert!(!result.success);
        assert_eq!(result.successful_sources, 0);
        assert_eq!(result.errors.len(), 3);
        assert!(result.content.contains("all 2 subtasks failed"));
        assert!(!result.coherence.coherent);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_rerender_keeps_no_result_notice() {
        let assembler = assembler();
        let failures = vec![SubtaskResult::failure("a", "general", "agent", "boom")];
        let result = assembler
            .assemble(Uuid::new_v4(), &failures, "anything", None, Some(OutputFormat::Markdown))
            .await;

        for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::Html] {
            let rerendered = assembler.rerender(&result, format);
            assert!(rerendered.content.contains("No result could be produced"), "{}", format);
            assert_eq!(rerendered.successful_sources, 0);
        }
    }

    #[tokio::test]
    async fn test_empty_input_never_panics() {
        let result = assembler()
            .assemble(Uuid::new_v4(), &[], "", Some(AssemblyStrategy::BestOf), None)
            .await;
        assert!(!result.success);
        assert_eq!(result.sources_count, 0);
    }

    #[tokio::test]
    async fn test_summary_uses_llm() {
        let result = assembler_with_llm(Some("Labor 40h and materials 3200 EUR."))
            .assemble(
                Uuid::new_v4(),
                &two_successes_one_failure(),
                "devis cuisine",
                Some(AssemblyStrategy::Summary),
                Some(OutputFormat::Text),
            )
            .await;

        assert_eq!(result.strategy_used, AssemblyStrategy::Summary);
        assert!(result.content.contains("Labor 40h and materials 3200 EUR."));
        assert_eq!(result.llm_usage.tokens, 300);
    }

    #[tokio::test]
    async fn test_summary_degrades_on_llm_error() {
        let result = assembler_with_llm(None)
            .assemble(
                Uuid::new_v4(),
                &two_successes_one_failure(),
                "devis cuisine",
                Some(AssemblyStrategy::Summary),
                None,
            )
            .await;

        assert_eq!(result.strategy_requested, AssemblyStrategy::Summary);
        assert_eq!(result.strategy_used, AssemblyStrategy::Concatenate);
        assert!(result.warnings.iter().any(|w| w.contains("Summary failed")));
        assert!(result.content.contains("40 hours"));
    }

    #[tokio::test]
    async fn test_summary_without_llm_degrades() {
        let result = assembler()
            .assemble(
                Uuid::new_v4(),
                &two_successes_one_failure(),
                "devis",
                Some(AssemblyStrategy::Summary),
                None,
            )
            .await;
        assert_eq!(result.strategy_used, AssemblyStrategy::Concatenate);
    }

    #[test]
    fn test_assemble_sync_never_calls_llm() {
        let result = assembler_with_llm(Some("should not appear")).assemble_sync(
            Uuid::new_v4(),
            &two_successes_one_failure(),
            "devis",
            Some(AssemblyStrategy::Summary),
            Some(OutputFormat::Html),
        );

        assert_eq!(result.strategy_used, AssemblyStrategy::Concatenate);
        assert!(!result.content.contains("should not appear"));
        assert!(result.llm_usage.is_empty());
        assert!(result.content.starts_with("<article>"));
    }

    #[test]
    fn test_long_request_title_is_truncated() {
        let title = title_for(&"x".repeat(200));
        assert_eq!(title.chars().count(), TITLE_CHARS + 3);
        assert_eq!(title_for("   "), "Response");
    }
}

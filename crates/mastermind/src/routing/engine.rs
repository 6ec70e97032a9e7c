//! Routing engine - keyword scoring with optional LLM refinement

use crate::{
    brain::{extract_json, LlmError, LlmHandle, LlmUsage},
    cache::{CacheKey, CacheStats, RoutingCache},
    types::Request,
};

use super::{
    AgentLevel, AgentRef, Department, DepartmentRegistry, RoutingConfig, RoutingMethod,
    RoutingResult,
};

/// Confidence assigned when no keyword matches at all
const NO_MATCH_CONFIDENCE: f64 = 0.3;
/// Multiplier applied to the primary department's share of all matches
const CONFIDENCE_BOOST: f64 = 1.2;

/// Classifies requests into departments.
///
/// Owns its cache; construct once and share by reference.
pub struct RoutingEngine {
    registry: DepartmentRegistry,
    config: RoutingConfig,
    cache: RoutingCache,
    llm: Option<LlmHandle>,
}

impl RoutingEngine {
    pub fn new(registry: DepartmentRegistry, config: RoutingConfig) -> Self {
        let cache = RoutingCache::new(config.cache_capacity);
        Self {
            registry,
            config,
            cache,
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: LlmHandle) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn registry(&self) -> &DepartmentRegistry {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Route a request; never fails
    pub async fn route(&self, request: &Request, force_department: Option<&str>) -> RoutingResult {
        self.route_with_usage(request, force_department).await.0
    }

    /// Route a request, also reporting the LLM usage the decision incurred
    pub async fn route_with_usage(
        &self,
        request: &Request,
        force_department: Option<&str>,
    ) -> (RoutingResult, LlmUsage) {
        if let Some(forced) = force_department.and_then(|id| self.forced_result(id)) {
            return (forced, LlmUsage::default());
        }

        let text = request.analyzable_text();
        let key = CacheKey::new(&text, self.config.cache_prefix_chars);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!("[ROUTING] Cache hit for '{}'", key.as_str());
            return ((*cached).clone(), LlmUsage::default());
        }

        let mut result = self.keyword_route(&text);
        let mut usage = LlmUsage::default();

        if result.confidence < self.config.confidence_threshold && self.config.llm_fallback {
            if let Some(llm) = &self.llm {
                match self.llm_route(llm, &text).await {
                    Ok((candidate, call_usage)) => {
                        usage.merge(&call_usage);
                        match candidate {
                            Some(candidate) if candidate.confidence > result.confidence => {
                                tracing::info!(
                                    "[ROUTING] LLM refined routing: {} ({:.2}) -> {} ({:.2})",
                                    result.department,
                                    result.confidence,
                                    candidate.department,
                                    candidate.confidence
                                );
                                result = candidate;
                            }
                            _ => {
                                tracing::debug!(
                                    "[ROUTING] LLM answer not adopted, keeping keyword result"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "[ROUTING] LLM fallback failed, keeping keyword result: {}",
                            e
                        );
                    }
                }
            }
        }

        tracing::info!(
            "[ROUTING] Routed to '{}' via {:?} (confidence {:.2})",
            result.department,
            result.method,
            result.confidence
        );

        self.cache.put(key, result.clone());
        (result, usage)
    }

    /// Keyword-only routing for callers without an async runtime.
    ///
    /// Shares the cache with [`route`](Self::route).
    pub fn route_sync(&self, request: &Request, force_department: Option<&str>) -> RoutingResult {
        if let Some(forced) = force_department.and_then(|id| self.forced_result(id)) {
            return forced;
        }

        let text = request.analyzable_text();
        let key = CacheKey::new(&text, self.config.cache_prefix_chars);
        if let Some(cached) = self.cache.get(&key) {
            return (*cached).clone();
        }

        let result = self.keyword_route(&text);
        self.cache.put(key, result.clone());
        result
    }

    fn forced_result(&self, department_id: &str) -> Option<RoutingResult> {
        match self.registry.get(department_id) {
            Some(department) => Some(RoutingResult {
                department: department.id.clone(),
                department_name: department.name.clone(),
                agent: department.lead_agent.clone(),
                confidence: 1.0,
                matched_keywords: Vec::new(),
                secondary_departments: Vec::new(),
                is_multi_department: false,
                method: RoutingMethod::Forced,
                reasoning: format!("Department forced to '{}'", department.id),
            }),
            None => {
                tracing::warn!(
                    "[ROUTING] Forced department '{}' is unknown, routing normally",
                    department_id
                );
                None
            }
        }
    }

    /// Score every department by keyword occurrences
    pub fn keyword_route(&self, text: &str) -> RoutingResult {
        let lower = text.to_lowercase();

        let scored: Vec<(&Department, usize, Vec<String>)> = self
            .registry
            .iter()
            .map(|department| {
                let (score, matched) = department.score(&lower);
                (department, score, matched)
            })
            .filter(|(_, score, _)| *score > 0)
            .collect();

        let total: usize = scored.iter().map(|(_, score, _)| score).sum();
        if total == 0 {
            return self.default_result();
        }

        // First department wins ties
        let mut primary_idx = 0;
        for (idx, (_, score, _)) in scored.iter().enumerate() {
            if *score > scored[primary_idx].1 {
                primary_idx = idx;
            }
        }

        let (primary, primary_score, matched) = &scored[primary_idx];

        let mut secondary: Vec<(&Department, usize)> = scored
            .iter()
            .enumerate()
            .filter(|(idx, (_, score, _))| *idx != primary_idx && score * 2 >= *primary_score)
            .map(|(_, (department, score, _))| (*department, *score))
            .collect();
        secondary.sort_by(|a, b| b.1.cmp(&a.1));

        let confidence = (CONFIDENCE_BOOST * *primary_score as f64 / total as f64).min(1.0);
        let secondary_departments: Vec<String> =
            secondary.iter().map(|(d, _)| d.id.clone()).collect();

        RoutingResult {
            department: primary.id.clone(),
            department_name: primary.name.clone(),
            agent: primary.lead_agent.clone(),
            confidence,
            matched_keywords: matched.clone(),
            is_multi_department: !secondary_departments.is_empty(),
            secondary_departments,
            method: RoutingMethod::Keyword,
            reasoning: format!(
                "{} of {} keyword matches point to {}",
                primary_score, total, primary.name
            ),
        }
    }

    fn default_result(&self) -> RoutingResult {
        let default_id = &self.config.default_department;
        let (name, agent) = match self.registry.get(default_id) {
            Some(department) => (department.name.clone(), department.lead_agent.clone()),
            None => (
                default_id.clone(),
                AgentRef {
                    id: format!("{}-assistant", default_id),
                    name: "General Assistant".to_string(),
                    level: AgentLevel::Manager,
                },
            ),
        };

        RoutingResult {
            department: default_id.clone(),
            department_name: name,
            agent,
            confidence: NO_MATCH_CONFIDENCE,
            matched_keywords: Vec::new(),
            secondary_departments: Vec::new(),
            is_multi_department: false,
            method: RoutingMethod::Keyword,
            reasoning: "No department keywords matched; using default department".to_string(),
        }
    }

    async fn llm_route(
        &self,
        llm: &LlmHandle,
        text: &str,
    ) -> Result<(Option<RoutingResult>, LlmUsage), LlmError> {
        let prompt = self.build_routing_prompt(text);
        let (completion, usage) = llm
            .complete_with_budget(&prompt, self.config.llm_max_tokens)
            .await?;

        Ok((self.parse_llm_answer(&completion.text), usage))
    }

    fn build_routing_prompt(&self, text: &str) -> String {
        let departments: Vec<String> = self
            .registry
            .iter()
            .map(|d| format!("- {}: {}", d.id, d.description))
            .collect();

        format!(
            "Classify the following business request into exactly one department.\n\n\
             Departments:\n{}\n\n\
             Request:\n\"{}\"\n\n\
             Respond with JSON only: {{\"department\": \"<id>\", \"confidence\": \
             <0.0-1.0>, \"reasoning\": \"<one sentence>\"}}",
            departments.join("\n"),
            text
        )
    }

    fn parse_llm_answer(&self, reply: &str) -> Option<RoutingResult> {
        let json = extract_json(reply)?;
        let department_id = json.get("department")?.as_str()?.trim().to_lowercase();

        let Some(department) = self.registry.get(&department_id) else {
            tracing::warn!(
                "[ROUTING] LLM chose unknown department '{}'",
                department_id
            );
            return None;
        };

        let confidence = json
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        Some(RoutingResult {
            department: department.id.clone(),
            department_name: department.name.clone(),
            agent: department.lead_agent.clone(),
            confidence,
            matched_keywords: Vec::new(),
            secondary_departments: Vec::new(),
            is_multi_department: false,
            method: RoutingMethod::Llm,
            reasoning: json
                .get("reasoning")
                .and_then(|r| r.as_str())
                .unwrap_or("Selected by LLM")
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::brain::{LlmClient, LlmCompletion, LlmConfig};

    struct ScriptedLlm {
        reply: Option<String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _model: &str,
            _max_tokens: u32,
        ) -> Result<LlmCompletion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(text) => Ok(LlmCompletion {
                    text: text.clone(),
                    tokens_used: 50,
                }),
                None => Err(LlmError::RequestFailed("connection refused".to_string())),
            }
        }
    }

    fn engine() -> RoutingEngine {
        RoutingEngine::new(DepartmentRegistry::default(), RoutingConfig::default())
    }

    fn engine_with_llm(reply: Option<&str>) -> (RoutingEngine, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm {
            reply: reply.map(str::to_string),
            calls: AtomicU32::new(0),
        });
        let handle = LlmHandle::new(llm.clone(), &LlmConfig::default());
        (engine().with_llm(handle), llm)
    }

    #[tokio::test]
    async fn test_construction_request_routes_with_high_confidence() {
        let request = Request::text("Rénovation complète cuisine et salle de bain, devis et plan");
        let result = engine().route(&request, None).await;

        assert_eq!(result.department, "construction");
        assert!(result.confidence >= 0.6);
        assert_eq!(result.method, RoutingMethod::Keyword);
        assert!(result.matched_keywords.contains(&"devis".to_string()));
    }

    #[tokio::test]
    async fn test_no_match_uses_default_department() {
        let result = engine().route(&Request::text("bonjour"), None).await;

        assert_eq!(result.department, "general");
        assert!((result.confidence - 0.3).abs() < f64::EPSILON);
        assert!(result.matched_keywords.is_empty());
    }

    #[tokio::test]
    async fn test_secondary_departments_flagged() {
        // finance: budget + facture = 2, marketing: campagne = 1
        let request = Request::text("budget de la campagne et facture");
        let result = engine().route(&request, None).await;

        assert_eq!(result.department, "finance");
        assert!(result.is_multi_department);
        assert_eq!(result.secondary_departments, vec!["marketing".to_string()]);
        assert!((result.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_forced_department_bypasses_scoring_and_cache() {
        let engine = engine();
        let request = Request::text("budget review");
        let result = engine.route(&request, Some("legal")).await;

        assert_eq!(result.department, "legal");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.method, RoutingMethod::Forced);
        assert_eq!(engine.cache_stats().hits + engine.cache_stats().misses, 0);
    }

    #[tokio::test]
    async fn test_repeat_request_hits_cache_with_identical_result() {
        let engine = engine();
        let request = Request::text("Recrutement de deux candidats");
        let first = engine.route(&request, None).await;
        let second = engine.route(&request, None).await;

        assert_eq!(first, second);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_consults_llm_and_adopts_better_answer() {
        let (engine, llm) = engine_with_llm(Some(
            r#"{"department": "hr", "confidence": 0.9, "reasoning": "staffing"}"#,
        ));
        let (result, usage) = engine
            .route_with_usage(&Request::text("we need more people on the team"), None)
            .await;

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.department, "hr");
        assert_eq!(result.method, RoutingMethod::Llm);
        assert_eq!(usage.calls, 1);
        assert_eq!(usage.tokens, 50);
    }

    #[tokio::test]
    async fn test_less_confident_llm_answer_is_ignored() {
        let (engine, _) = engine_with_llm(Some(r#"{"department": "hr", "confidence": 0.1}"#));
        let result = engine.route(&Request::text("bonjour"), None).await;

        assert_eq!(result.department, "general");
        assert_eq!(result.method, RoutingMethod::Keyword);
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_keyword_result() {
        let (engine, llm) = engine_with_llm(None);
        let result = engine.route(&Request::text("bonjour"), None).await;

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.department, "general");
        assert!((result.confidence - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_llm_department_is_rejected() {
        let (engine, _) =
            engine_with_llm(Some(r#"{"department": "astrology", "confidence": 0.99}"#));
        let result = engine.route(&Request::text("bonjour"), None).await;
        assert_eq!(result.department, "general");
    }

    #[test]
    fn test_route_sync_is_keyword_only() {
        let (engine, llm) = engine_with_llm(Some(r#"{"department": "hr", "confidence": 0.9}"#));
        let result = engine.route_sync(&Request::text("bonjour"), None);

        assert_eq!(result.department, "general");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_confidence_always_in_unit_interval() {
        let engine = engine();
        for text in [
            "",
            "devis devis devis",
            "marketing budget recrutement contrat ticket",
            "Plan plan PLAN de chantier",
        ] {
            let result = engine.keyword_route(text);
            assert!((0.0..=1.0).contains(&result.confidence), "{}", text);
            assert!(engine.registry().contains(&result.department));
        }
    }
}

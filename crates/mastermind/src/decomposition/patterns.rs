//! Pattern library - predefined decompositions triggered by keywords

use serde::{Deserialize, Serialize};

use crate::types::Priority;

use super::ExecutionOrder;

/// One subtask of a pattern, with static dependency edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskTemplate {
    pub id: String,
    pub description: String,
    pub agent_type: String,
    /// Overrides the pattern's department for this subtask
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub duration_secs: u64,
    #[serde(default)]
    pub priority: Priority,
    pub estimated_tokens: u32,
}

/// A named decomposition template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecompositionPattern {
    pub name: String,
    pub description: String,
    /// Lowercase trigger keywords
    pub trigger_keywords: Vec<String>,
    pub min_matches: usize,
    pub department: String,
    pub execution_order: ExecutionOrder,
    pub subtasks: Vec<SubtaskTemplate>,
}

impl DecompositionPattern {
    /// Number of distinct trigger keywords found in already-lowercased text
    pub fn match_count(&self, text_lower: &str) -> usize {
        self.trigger_keywords
            .iter()
            .filter(|k| text_lower.contains(k.as_str()))
            .count()
    }

    /// Confidence for a given match count: 0.6 at the minimum, +0.1 per extra match
    pub fn confidence(&self, matches: usize) -> f64 {
        let extra = matches.saturating_sub(self.min_matches) as f64;
        (0.6 + 0.1 * extra).min(0.95)
    }
}

/// A pattern selected for a request
#[derive(Debug, Clone, Copy)]
pub struct PatternMatch<'a> {
    pub pattern: &'a DecompositionPattern,
    pub matches: usize,
    pub confidence: f64,
}

/// Ordered collection of patterns; on equal match counts the earlier wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternLibrary {
    patterns: Vec<DecompositionPattern>,
}

impl PatternLibrary {
    pub fn new(patterns: Vec<DecompositionPattern>) -> Self {
        Self { patterns }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Add or replace a pattern by name
    pub fn register(&mut self, pattern: DecompositionPattern) {
        if let Some(existing) = self.patterns.iter_mut().find(|p| p.name == pattern.name) {
            *existing = pattern;
        } else {
            self.patterns.push(pattern);
        }
    }

    pub fn get(&self, name: &str) -> Option<&DecompositionPattern> {
        self.patterns.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Pattern with the most trigger matches at or above its minimum
    pub fn best_match(&self, text: &str) -> Option<PatternMatch<'_>> {
        let lower = text.to_lowercase();
        let mut best: Option<PatternMatch<'_>> = None;

        for pattern in &self.patterns {
            let matches = pattern.match_count(&lower);
            if matches == 0 || matches < pattern.min_matches {
                continue;
            }
            if best.map_or(true, |b| matches > b.matches) {
                best = Some(PatternMatch {
                    pattern,
                    matches,
                    confidence: pattern.confidence(matches),
                });
            }
        }

        best
    }
}

fn step(
    id: &str,
    description: &str,
    agent_type: &str,
    dependencies: &[&str],
    duration_secs: u64,
    priority: Priority,
) -> SubtaskTemplate {
    SubtaskTemplate {
        id: id.to_string(),
        description: description.to_string(),
        agent_type: agent_type.to_string(),
        department: None,
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        duration_secs,
        priority,
        estimated_tokens: 800,
    }
}

fn pattern(
    name: &str,
    description: &str,
    triggers: &[&str],
    min_matches: usize,
    department: &str,
    execution_order: ExecutionOrder,
    subtasks: Vec<SubtaskTemplate>,
) -> DecompositionPattern {
    DecompositionPattern {
        name: name.to_string(),
        description: description.to_string(),
        trigger_keywords: triggers.iter().map(|t| t.to_lowercase()).collect(),
        min_matches,
        department: department.to_string(),
        execution_order,
        subtasks,
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        use ExecutionOrder::{Mixed, Sequential};
        use Priority::{High, Low, Normal};

        Self::new(vec![
            pattern(
                "construction_estimate",
                "Quantity take-off and priced estimate for building works",
                &[
                    "devis",
                    "estimation",
                    "estimate",
                    "quote",
                    "chiffrage",
                    "métré",
                    "plan",
                    "quantités",
                ],
                2,
                "construction",
                Mixed,
                vec![
                    step(
                        "analyze_scope",
                        "Analyze the scope of work and constraints",
                        "scope_analyst",
                        &[],
                        90,
                        High,
                    ),
                    step(
                        "measure_quantities",
                        "Measure surfaces and quantities from the plans",
                        "quantity_surveyor",
                        &["analyze_scope"],
                        120,
                        High,
                    ),
                    step(
                        "estimate_labor",
                        "Estimate labor hours per trade",
                        "labor_estimator",
                        &["measure_quantities"],
                        90,
                        Normal,
                    ),
                    step(
                        "price_materials",
                        "Price materials and supplies",
                        "materials_pricer",
                        &["measure_quantities"],
                        90,
                        Normal,
                    ),
                    step(
                        "compile_estimate",
                        "Compile the priced estimate",
                        "estimator",
                        &["estimate_labor", "price_materials"],
                        60,
                        High,
                    ),
                ],
            ),
            pattern(
                "renovation_project",
                "Phasing and trade coordination for a renovation site",
                &[
                    "planning de chantier",
                    "site planning",
                    "phasage",
                    "coordination des lots",
                    "calendrier des travaux",
                    "work schedule",
                    "démolition",
                    "gros œuvre",
                    "second œuvre",
                ],
                2,
                "construction",
                Mixed,
                vec![
                    step(
                        "survey_site",
                        "Survey the site and existing conditions",
                        "site_surveyor",
                        &[],
                        120,
                        High,
                    ),
                    step(
                        "define_phases",
                        "Define work phases and milestones",
                        "project_planner",
                        &["survey_site"],
                        90,
                        Normal,
                    ),
                    step(
                        "assign_trades",
                        "Assign trades to each phase",
                        "site_coordinator",
                        &["survey_site"],
                        60,
                        Normal,
                    ),
                    step(
                        "build_schedule",
                        "Build the site schedule",
                        "project_planner",
                        &["define_phases", "assign_trades"],
                        60,
                        High,
                    ),
                ],
            ),
            pattern(
                "financial_report",
                "Periodic financial reporting",
                &[
                    "rapport financier",
                    "financial report",
                    "compte de résultat",
                    "p&l",
                    "clôture",
                    "reporting financier",
                ],
                1,
                "finance",
                Mixed,
                vec![
                    step(
                        "collect_data",
                        "Collect ledger and banking data",
                        "data_collector",
                        &[],
                        60,
                        High,
                    ),
                    step(
                        "reconcile_accounts",
                        "Reconcile accounts",
                        "accountant",
                        &["collect_data"],
                        120,
                        High,
                    ),
                    step(
                        "analyze_variances",
                        "Analyze variances against budget",
                        "financial_analyst",
                        &["collect_data"],
                        90,
                        Normal,
                    ),
                    step(
                        "draft_report",
                        "Draft the financial report",
                        "report_writer",
                        &["reconcile_accounts", "analyze_variances"],
                        90,
                        Normal,
                    ),
                    step(
                        "review_report",
                        "Review figures and commentary",
                        "finance_reviewer",
                        &["draft_report"],
                        45,
                        Normal,
                    ),
                ],
            ),
            pattern(
                "marketing_campaign",
                "Multi-channel campaign preparation",
                &[
                    "campagne",
                    "campaign",
                    "lancement",
                    "launch",
                    "promotion",
                    "newsletter",
                    "social media",
                    "réseaux sociaux",
                ],
                2,
                "marketing",
                Mixed,
                vec![
                    step(
                        "market_research",
                        "Research the target audience and competitors",
                        "market_researcher",
                        &[],
                        90,
                        Normal,
                    ),
                    step(
                        "define_strategy",
                        "Define positioning and campaign strategy",
                        "marketing_strategist",
                        &["market_research"],
                        60,
                        High,
                    ),
                    step(
                        "create_content",
                        "Create campaign content",
                        "content_creator",
                        &["define_strategy"],
                        120,
                        Normal,
                    ),
                    step(
                        "plan_channels",
                        "Plan channels and budget split",
                        "media_planner",
                        &["define_strategy"],
                        60,
                        Normal,
                    ),
                    step(
                        "schedule_campaign",
                        "Schedule the campaign",
                        "campaign_manager",
                        &["create_content", "plan_channels"],
                        45,
                        Normal,
                    ),
                ],
            ),
            pattern(
                "recruitment",
                "Hiring a new role",
                &[
                    "recrutement",
                    "recruitment",
                    "hiring",
                    "embauche",
                    "fiche de poste",
                    "job description",
                ],
                1,
                "hr",
                Sequential,
                vec![
                    step(
                        "define_role",
                        "Define the role and requirements",
                        "hr_specialist",
                        &[],
                        60,
                        High,
                    ),
                    step(
                        "write_job_posting",
                        "Write the job posting",
                        "hr_writer",
                        &["define_role"],
                        60,
                        Normal,
                    ),
                    step(
                        "screen_candidates",
                        "Screen incoming candidates",
                        "recruiter",
                        &["write_job_posting"],
                        120,
                        Normal,
                    ),
                    step(
                        "schedule_interviews",
                        "Schedule interviews",
                        "hr_coordinator",
                        &["screen_candidates"],
                        45,
                        Low,
                    ),
                ],
            ),
            {
                let mut pricing = step(
                    "set_pricing",
                    "Set price and margin",
                    "pricing_analyst",
                    &["prepare_catalog_entry"],
                    60,
                    High,
                );
                pricing.department = Some("finance".to_string());
                pattern(
                    "product_launch",
                    "Putting a new product on sale online",
                    &[
                        "nouveau produit",
                        "new product",
                        "product launch",
                        "lancement produit",
                        "fiche produit",
                    ],
                    1,
                    "ecommerce",
                    Mixed,
                    vec![
                        step(
                            "prepare_catalog_entry",
                            "Prepare the catalog entry",
                            "catalog_manager",
                            &[],
                            60,
                            High,
                        ),
                        pricing,
                        step(
                            "update_inventory",
                            "Register initial inventory",
                            "inventory_manager",
                            &["prepare_catalog_entry"],
                            45,
                            Normal,
                        ),
                        step(
                            "publish_listing",
                            "Publish the listing",
                            "store_manager",
                            &["set_pricing", "update_inventory"],
                            30,
                            Normal,
                        ),
                    ],
                )
            },
            pattern(
                "customer_onboarding",
                "Onboarding a newly signed customer",
                &[
                    "onboarding client",
                    "customer onboarding",
                    "nouveau client",
                    "new customer",
                    "welcome pack",
                ],
                1,
                "sales",
                Sequential,
                vec![
                    step(
                        "create_account",
                        "Create the customer account",
                        "account_manager",
                        &[],
                        30,
                        High,
                    ),
                    step(
                        "configure_crm",
                        "Configure the CRM record and pipeline stage",
                        "crm_specialist",
                        &["create_account"],
                        45,
                        Normal,
                    ),
                    step(
                        "send_welcome",
                        "Send the welcome pack",
                        "customer_success",
                        &["configure_crm"],
                        30,
                        Normal,
                    ),
                    step(
                        "schedule_kickoff",
                        "Schedule the kickoff meeting",
                        "account_manager",
                        &["send_welcome"],
                        30,
                        Low,
                    ),
                ],
            ),
            pattern(
                "contract_review",
                "Legal review of a contract",
                &[
                    "contrat",
                    "contract",
                    "clause",
                    "nda",
                    "revue juridique",
                    "legal review",
                ],
                2,
                "legal",
                Mixed,
                vec![
                    step(
                        "extract_clauses",
                        "Extract key clauses and obligations",
                        "contract_analyst",
                        &[],
                        90,
                        High,
                    ),
                    step(
                        "assess_risks",
                        "Assess legal and financial risks",
                        "legal_counsel",
                        &["extract_clauses"],
                        90,
                        High,
                    ),
                    step(
                        "check_compliance",
                        "Check regulatory compliance",
                        "compliance_officer",
                        &["extract_clauses"],
                        60,
                        Normal,
                    ),
                    step(
                        "summarize_findings",
                        "Summarize findings and recommended changes",
                        "legal_counsel",
                        &["assess_risks", "check_compliance"],
                        45,
                        Normal,
                    ),
                ],
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::validation::validate_subtasks;
    use crate::decomposition::Subtask;

    #[test]
    fn test_renovation_request_selects_estimate_pattern() {
        let library = PatternLibrary::default();
        let found = library
            .best_match("Rénovation complète cuisine et salle de bain, devis et plan")
            .expect("pattern match");

        assert_eq!(found.pattern.name, "construction_estimate");
        assert_eq!(found.matches, 2);
        assert!((found.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_below_minimum_does_not_match() {
        let library = PatternLibrary::default();
        // one construction trigger, minimum is two
        assert!(library.best_match("un devis svp").is_none());
        assert!(library.best_match("bonjour").is_none());
    }

    #[test]
    fn test_more_matches_wins() {
        let library = PatternLibrary::default();
        let found = library
            .best_match("campagne newsletter et réseaux sociaux pour le lancement")
            .expect("pattern match");
        assert_eq!(found.pattern.name, "marketing_campaign");
        assert_eq!(found.matches, 4);
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut library = PatternLibrary::default();
        let count = library.len();
        let mut custom = library.get("recruitment").cloned().unwrap();
        custom.min_matches = 3;
        library.register(custom);

        assert_eq!(library.len(), count);
        assert_eq!(library.get("recruitment").unwrap().min_matches, 3);
    }

    #[test]
    fn test_default_patterns_are_valid_graphs() {
        for pattern in PatternLibrary::default().patterns {
            let subtasks: Vec<Subtask> = pattern
                .subtasks
                .iter()
                .enumerate()
                .map(|(i, t)| Subtask {
                    id: t.id.clone(),
                    sequence: i as u32 + 1,
                    description: t.description.clone(),
                    department: pattern.department.clone(),
                    agent_type: t.agent_type.clone(),
                    dependencies: t.dependencies.clone(),
                    estimated_duration_secs: t.duration_secs,
                    estimated_tokens: t.estimated_tokens,
                    estimated_cost: 0.0,
                    priority: t.priority,
                })
                .collect();
            assert!(validate_subtasks(&subtasks).is_ok(), "{}", pattern.name);
        }
    }
}

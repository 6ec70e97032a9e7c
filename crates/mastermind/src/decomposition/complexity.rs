//! Complexity scoring for incoming requests

use super::{ComplexityAnalysis, ComplexityLevel};

const HIGH_WEIGHT: f64 = 0.15;
const MEDIUM_WEIGHT: f64 = 0.08;
const LOW_WEIGHT: f64 = -0.05;
const CONNECTIVE_WEIGHT: f64 = 0.05;
const CONNECTIVE_CAP: f64 = 0.2;
const PATTERN_BONUS: f64 = 0.2;

/// Terms that signal broad, multi-part work
const HIGH_TERMS: &[&str] = &[
    "complet",
    "complète",
    "complete",
    "comprehensive",
    "intégral",
    "entire",
    "end-to-end",
    "stratégie",
    "strategy",
    "migration",
    "transformation",
    "refonte",
    "overhaul",
    "restructuration",
    "restructuring",
    "audit",
];

/// Terms that signal a concrete deliverable
const MEDIUM_TERMS: &[&str] = &[
    "analyse",
    "analyze",
    "analysis",
    "plan",
    "devis",
    "estimate",
    "estimation",
    "report",
    "rapport",
    "budget",
    "compare",
    "comparer",
    "optimiser",
    "optimize",
    "préparer",
    "prepare",
    "organiser",
    "organize",
    "review",
    "design",
    "conception",
];

/// Terms that signal a quick exchange
const LOW_TERMS: &[&str] = &[
    "bonjour",
    "hello",
    "merci",
    "thanks",
    "simple",
    "quick",
    "rapide",
    "what is",
    "qu'est-ce",
    "statut",
    "status",
];

/// Phrases that join several tasks in one request
const CONNECTIVES: &[&str] = &[
    " et ",
    " and ",
    ", ",
    " puis ",
    " then ",
    " ainsi que ",
    " as well as ",
    " also ",
    " aussi ",
];

/// Scores request text into a [`ComplexityAnalysis`]
#[derive(Debug, Clone)]
pub struct ComplexityAnalyzer {
    decomposition_threshold: f64,
}

impl ComplexityAnalyzer {
    pub fn new(decomposition_threshold: f64) -> Self {
        Self {
            decomposition_threshold,
        }
    }

    /// Score `text`; `matched_pattern` names a pattern whose triggers matched
    pub fn analyze(&self, text: &str, matched_pattern: Option<&str>) -> ComplexityAnalysis {
        let lower = text.to_lowercase();
        let mut score = 0.0;
        let mut factors = Vec::new();

        for (terms, weight, label) in [
            (HIGH_TERMS, HIGH_WEIGHT, "high-complexity terms"),
            (MEDIUM_TERMS, MEDIUM_WEIGHT, "medium-complexity terms"),
            (LOW_TERMS, LOW_WEIGHT, "low-complexity terms"),
        ] {
            let hits: Vec<&str> = terms
                .iter()
                .copied()
                .filter(|term| lower.contains(term))
                .collect();
            if !hits.is_empty() {
                let contribution = weight * hits.len() as f64;
                score += contribution;
                factors.push(format!("{}: {} ({:+.2})", label, hits.join(", "), contribution));
            }
        }

        let words = lower.split_whitespace().count();
        let length_bonus = match words {
            w if w > 100 => 0.3,
            w if w > 50 => 0.2,
            w if w > 20 => 0.1,
            _ => 0.0,
        };
        if length_bonus > 0.0 {
            score += length_bonus;
            factors.push(format!("length: {} words ({:+.2})", words, length_bonus));
        }

        let connectives: usize = CONNECTIVES.iter().map(|c| lower.matches(c).count()).sum();
        if connectives > 0 {
            let contribution = (CONNECTIVE_WEIGHT * connectives as f64).min(CONNECTIVE_CAP);
            score += contribution;
            factors.push(format!(
                "multi-task connectives: {} ({:+.2})",
                connectives, contribution
            ));
        }

        if let Some(pattern) = matched_pattern {
            score += PATTERN_BONUS;
            factors.push(format!("matches pattern '{}' ({:+.2})", pattern, PATTERN_BONUS));
        }

        let score = score.clamp(0.0, 1.0);
        let level = ComplexityLevel::from_score(score);

        ComplexityAnalysis {
            score,
            level,
            factors,
            should_decompose: score >= self.decomposition_threshold,
            estimated_subtasks: level.estimated_subtasks(),
            matched_pattern: matched_pattern.map(str::to_string),
        }
    }
}

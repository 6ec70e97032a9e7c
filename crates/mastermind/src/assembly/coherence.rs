//! Coherence checks over a set of subtask results

use serde::{Deserialize, Serialize};

use crate::types::SubtaskResult;

const EMPTY_OUTPUT_PENALTY: f64 = 0.1;
const ERROR_RATIO_LIMIT: f64 = 0.5;
const ERROR_RATIO_PENALTY: f64 = 0.4;
const LOW_CONFIDENCE_PENALTY: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceReport {
    pub coherent: bool,
    /// Starts at 1.0, reduced per issue, floored at 0
    pub confidence: f64,
    pub issues: Vec<String>,
    pub empty_outputs: usize,
    pub error_ratio: f64,
    pub low_confidence: usize,
}

pub fn check_coherence(
    results: &[SubtaskResult],
    low_confidence_threshold: f64,
) -> CoherenceReport {
    if results.is_empty() {
        return CoherenceReport {
            coherent: false,
            confidence: 0.0,
            issues: vec!["No subtask results to assemble".to_string()],
            empty_outputs: 0,
            error_ratio: 0.0,
            low_confidence: 0,
        };
    }

    let mut confidence: f64 = 1.0;
    let mut coherent = true;
    let mut issues = Vec::new();

    let successes: Vec<&SubtaskResult> = results.iter().filter(|r| r.success).collect();

    let empty: Vec<&str> = successes
        .iter()
        .filter(|r| r.output_text().trim().is_empty())
        .map(|r| r.subtask_id.as_str())
        .collect();
    if !empty.is_empty() {
        confidence -= EMPTY_OUTPUT_PENALTY * empty.len() as f64;
        issues.push(format!("Empty output from: {}", empty.join(", ")));
    }

    let failures = results.len() - successes.len();
    let error_ratio = failures as f64 / results.len() as f64;
    if error_ratio > ERROR_RATIO_LIMIT {
        confidence -= ERROR_RATIO_PENALTY;
        coherent = false;
        issues.push(format!(
            "{} of {} subtasks failed",
            failures,
            results.len()
        ));
    }

    let low_confidence = successes
        .iter()
        .filter(|r| r.confidence < low_confidence_threshold)
        .count();
    if !successes.is_empty() && low_confidence * 3 > successes.len() {
        confidence -= LOW_CONFIDENCE_PENALTY;
        issues.push(format!(
            "{} of {} results have confidence below {:.2}",
            low_confidence,
            successes.len(),
            low_confidence_threshold
        ));
    }

    CoherenceReport {
        coherent,
        confidence: confidence.max(0.0),
        issues,
        empty_outputs: empty.len(),
        error_ratio,
        low_confidence,
    }
}

//! Strategy implementations producing an [`AssembledBody`]

use crate::types::SubtaskResult;

use super::{AssembledBody, AssemblyStrategy, Block, Section};

/// Build the body for every strategy that needs no LLM.
///
/// Only successful results contribute content. `Summary` is handled by the
/// assembler and is treated as `Concatenate` here.
pub fn build_body(
    strategy: AssemblyStrategy,
    title: &str,
    results: &[SubtaskResult],
    separator: &str,
) -> AssembledBody {
    let successes: Vec<&SubtaskResult> = results.iter().filter(|r| r.success).collect();

    let sections = match strategy {
        AssemblyStrategy::Merge => merge(&successes),
        AssemblyStrategy::Concatenate | AssemblyStrategy::Summary => {
            concatenate(&successes, separator)
        }
        AssemblyStrategy::Structured => structured(&successes),
        AssemblyStrategy::Hierarchical => hierarchical(&successes),
        AssemblyStrategy::BestOf => best_of(&successes),
        AssemblyStrategy::Weighted => weighted(&successes),
    };

    AssembledBody {
        title: title.to_string(),
        sections,
    }
}

/// Body holding a synthesized summary
pub fn summary_body(title: &str, summary: &str) -> AssembledBody {
    AssembledBody {
        title: title.to_string(),
        sections: vec![Section {
            heading: Some("Summary".to_string()),
            level: 1,
            blocks: vec![Block {
                label: None,
                text: summary.trim().to_string(),
                confidence: None,
            }],
        }],
    }
}

fn label(result: &SubtaskResult) -> String {
    format!("{} ({})", humanize(&result.subtask_id), result.agent_type)
}

/// "price_materials" -> "Price materials"
fn humanize(id: &str) -> String {
    let spaced = id.replace(['_', '-'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn merge(results: &[&SubtaskResult]) -> Vec<Section> {
    let mut section = Section::new(None, 1);
    section.blocks = results
        .iter()
        .map(|r| Block {
            label: Some(label(r)),
            text: r.output_text(),
            confidence: None,
        })
        .collect();
    vec![section]
}

fn concatenate(results: &[&SubtaskResult], separator: &str) -> Vec<Section> {
    let joined = results
        .iter()
        .map(|r| r.output_text())
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join(separator);

    let mut section = Section::new(None, 1);
    section.blocks.push(Block {
        label: None,
        text: joined,
        confidence: None,
    });
    vec![section]
}

/// Distinct values of `key` in first-seen order
fn distinct<'a>(
    results: &[&'a SubtaskResult],
    key: impl Fn(&'a SubtaskResult) -> &'a str,
) -> Vec<&'a str> {
    let mut seen: Vec<&str> = Vec::new();
    for result in results {
        let value = key(*result);
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

fn structured(results: &[&SubtaskResult]) -> Vec<Section> {
    let mut sections = vec![Section::new(Some("By department".to_string()), 1)];
    for department in distinct(results, |r| r.department.as_str()) {
        let mut section = Section::new(Some(humanize(department)), 2);
        section.blocks = results
            .iter()
            .filter(|r| r.department == department)
            .map(|r| Block {
                label: Some(label(r)),
                text: r.output_text(),
                confidence: None,
            })
            .collect();
        sections.push(section);
    }

    sections.push(Section::new(Some("By agent".to_string()), 1));
    for agent in distinct(results, |r| r.agent_type.as_str()) {
        let mut section = Section::new(Some(agent.to_string()), 2);
        section.blocks = results
            .iter()
            .filter(|r| r.agent_type == agent)
            .map(|r| Block {
                label: Some(humanize(&r.subtask_id)),
                text: r.output_text(),
                confidence: None,
            })
            .collect();
        sections.push(section);
    }
    sections
}

fn hierarchical(results: &[&SubtaskResult]) -> Vec<Section> {
    distinct(results, |r| r.department.as_str())
        .into_iter()
        .map(|department| {
            let mut section = Section::new(Some(humanize(department)), 1);
            section.blocks = results
                .iter()
                .filter(|r| r.department == department)
                .map(|r| Block {
                    label: Some(label(r)),
                    text: r.output_text(),
                    confidence: Some(r.confidence),
                })
                .collect();
            section
        })
        .collect()
}

fn best_of(results: &[&SubtaskResult]) -> Vec<Section> {
    let mut section = Section::new(None, 1);
    // First result wins ties
    let best = results.iter().fold(None::<&SubtaskResult>, |best, r| match best {
        Some(b) if b.confidence >= r.confidence => Some(b),
        _ => Some(*r),
    });
    if let Some(best) = best {
        section.blocks.push(Block {
            label: Some(label(best)),
            text: best.output_text(),
            confidence: Some(best.confidence),
        });
    }
    vec![section]
}

fn weighted(results: &[&SubtaskResult]) -> Vec<Section> {
    let mut ordered: Vec<&SubtaskResult> = results.to_vec();
    ordered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut section = Section::new(None, 1);
    section.blocks = ordered
        .into_iter()
        .map(|r| Block {
            label: Some(label(r)),
            text: r.output_text(),
            confidence: Some(r.confidence),
        })
        .collect();
    vec![section]
}

//! Structural checks on subtask dependency graphs

use std::collections::{HashMap, HashSet};

use super::{ExecutionOrder, Subtask};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubtaskGraphError {
    #[error("subtask with empty id")]
    EmptyId,

    #[error("duplicate subtask id '{0}'")]
    DuplicateId(String),

    #[error("subtask '{subtask}' depends on unknown subtask '{dependency}'")]
    UnknownDependency { subtask: String, dependency: String },

    #[error("subtask '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle among subtasks: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Check ids are unique, dependencies reference siblings, and the graph is acyclic
pub fn validate_subtasks(subtasks: &[Subtask]) -> Result<(), SubtaskGraphError> {
    let mut ids = HashSet::new();
    for subtask in subtasks {
        if subtask.id.trim().is_empty() {
            return Err(SubtaskGraphError::EmptyId);
        }
        if !ids.insert(subtask.id.as_str()) {
            return Err(SubtaskGraphError::DuplicateId(subtask.id.clone()));
        }
    }

    for subtask in subtasks {
        for dependency in &subtask.dependencies {
            if dependency == &subtask.id {
                return Err(SubtaskGraphError::SelfDependency(subtask.id.clone()));
            }
            if !ids.contains(dependency.as_str()) {
                return Err(SubtaskGraphError::UnknownDependency {
                    subtask: subtask.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    dependency_layers(subtasks).map(|_| ())
}

/// Kahn layering: each layer holds subtasks whose dependencies are all in earlier layers.
///
/// Unknown dependency ids are ignored here; [`validate_subtasks`] reports them.
pub fn dependency_layers(subtasks: &[Subtask]) -> Result<Vec<Vec<String>>, SubtaskGraphError> {
    let known: HashSet<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for subtask in subtasks {
        let deps: HashSet<&str> = subtask
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| known.contains(d))
            .collect();
        in_degree.insert(subtask.id.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(subtask.id.as_str());
        }
    }

    let mut layers = Vec::new();
    let mut current: Vec<&str> = subtasks
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut placed = 0;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for id in &current {
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        layers.push(current.iter().map(|id| id.to_string()).collect());
        current = next;
    }

    if placed < subtasks.len() {
        let stuck = subtasks
            .iter()
            .filter(|s| in_degree.get(s.id.as_str()).is_some_and(|d| *d > 0))
            .map(|s| s.id.clone())
            .collect();
        return Err(SubtaskGraphError::Cycle(stuck));
    }

    Ok(layers)
}

/// Classify a graph: a chain is sequential, a single layer of many is parallel
pub fn classify_order(subtasks: &[Subtask]) -> ExecutionOrder {
    match dependency_layers(subtasks) {
        Ok(layers) if layers.iter().all(|l| l.len() <= 1) => ExecutionOrder::Sequential,
        Ok(layers) if layers.len() == 1 => ExecutionOrder::Parallel,
        _ => ExecutionOrder::Mixed,
    }
}

/// Longest dependency chain measured in estimated seconds
pub fn critical_path_secs(subtasks: &[Subtask]) -> u64 {
    let Ok(layers) = dependency_layers(subtasks) else {
        return subtasks.iter().map(|s| s.estimated_duration_secs).sum();
    };

    let by_id: HashMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut finish: HashMap<&str, u64> = HashMap::new();

    for layer in &layers {
        for id in layer {
            let Some(subtask) = by_id.get(id.as_str()) else {
                continue;
            };
            let start = subtask
                .dependencies
                .iter()
                .filter_map(|d| finish.get(d.as_str()))
                .max()
                .copied()
                .unwrap_or(0);
            finish.insert(subtask.id.as_str(), start + subtask.estimated_duration_secs);
        }
    }

    finish.values().max().copied().unwrap_or(0)
}

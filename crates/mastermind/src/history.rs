//! Completed-request history: bounded in-memory ring buffer plus an optional
//! append-only sink

use std::{
    collections::{BTreeMap, VecDeque},
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{brain::LlmUsage, MastermindError, Result};

/// One completed request, as kept for statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_id: Uuid,
    pub trace_id: Uuid,
    pub success: bool,
    /// Absent when the request failed before routing
    pub department: Option<String>,
    pub agent: Option<String>,
    pub total_subtasks: usize,
    pub successful_subtasks: usize,
    pub duration_ms: u64,
    pub llm_usage: LlmUsage,
    pub error_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Durable destination for history entries. Append-only.
pub trait HistorySink: Send + Sync {
    fn append(&self, entry: &HistoryEntry) -> Result<()>;
}

/// Writes one JSON object per line
#[derive(Debug)]
pub struct JsonlHistorySink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlHistorySink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!("[MASTERMIND] History sink opened at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySink for JsonlHistorySink {
    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| MastermindError::History("history file lock poisoned".to_string()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Aggregate statistics over the retained history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub department_counts: BTreeMap<String, usize>,
    pub total_llm_cost: f64,
    pub total_llm_tokens: u64,
}

/// Bounded ring buffer; the oldest entry is dropped first
#[derive(Debug)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest last
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let total = self.entries.len();
        if total == 0 {
            return HistoryStats::default();
        }

        let successful = self.entries.iter().filter(|e| e.success).count();
        let mut department_counts = BTreeMap::new();
        let mut duration_sum = 0u64;
        let mut total_llm_cost = 0.0;
        let mut total_llm_tokens = 0u64;

        for entry in &self.entries {
            if let Some(department) = &entry.department {
                *department_counts.entry(department.clone()).or_insert(0) += 1;
            }
            duration_sum += entry.duration_ms;
            total_llm_cost += entry.llm_usage.cost;
            total_llm_tokens += entry.llm_usage.tokens;
        }

        HistoryStats {
            total_processed: total,
            successful,
            failed: total - successful,
            success_rate: successful as f64 / total as f64,
            average_duration_ms: duration_sum as f64 / total as f64,
            department_counts,
            total_llm_cost,
            total_llm_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(department: &str, success: bool, duration_ms: u64) -> HistoryEntry {
        let now = Utc::now();
        HistoryEntry {
            task_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            success,
            department: Some(department.to_string()),
            agent: Some("general-assistant".to_string()),
            total_subtasks: 1,
            successful_subtasks: usize::from(success),
            duration_ms,
            llm_usage: LlmUsage {
                calls: 1,
                tokens: 100,
                cost: 0.0002,
            },
            error_count: usize::from(!success),
            started_at: now,
            completed_at: now,
        }
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let mut log = HistoryLog::new(2);
        log.push(entry("finance", true, 10));
        log.push(entry("sales", true, 20));
        log.push(entry("support", false, 30));

        assert_eq!(log.len(), 2);
        let departments: Vec<_> = log
            .entries()
            .filter_map(|e| e.department.clone())
            .collect();
        assert_eq!(departments, vec!["sales", "support"]);
        assert_eq!(log.recent(1)[0].department.as_deref(), Some("support"));
    }

    #[test]
    fn test_stats() {
        let mut log = HistoryLog::new(10);
        log.push(entry("finance", true, 100));
        log.push(entry("finance", false, 300));
        log.push(entry("sales", true, 200));

        let stats = log.stats();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_duration_ms - 200.0).abs() < 1e-9);
        assert_eq!(stats.department_counts.get("finance"), Some(&2));
        assert_eq!(stats.total_llm_tokens, 300);
    }

    #[test]
    fn test_empty_stats() {
        let log = HistoryLog::new(10);
        assert_eq!(log.stats(), HistoryStats::default());
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.jsonl");
        let sink = JsonlHistorySink::open(&path).unwrap();

        let first = entry("finance", true, 10);
        sink.append(&first).unwrap();
        sink.append(&entry("sales", false, 20)).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: HistoryEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, first);
    }
}

//! Request and shared record types passed between pipeline phases

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Keys looked up first when extracting text from a structured request
const TEXT_KEYS: &[&str] = &[
    "request",
    "message",
    "query",
    "prompt",
    "title",
    "description",
    "content",
    "text",
];

/// Body of an incoming request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum RequestContent {
    Text(String),
    Structured(serde_json::Map<String, serde_json::Value>),
}

/// Immutable input to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: Uuid,
    pub content: RequestContent,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(RequestContent::Text(content.into()))
    }

    pub fn structured(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::new(RequestContent::Structured(fields))
    }

    fn new(content: RequestContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            user_id: None,
            project_id: None,
            company_id: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_company(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }

    /// Text used for keyword scoring and LLM prompts.
    ///
    /// Structured requests contribute their well-known text fields; when none
    /// are present every string value is used, in key order.
    pub fn analyzable_text(&self) -> String {
        match &self.content {
            RequestContent::Text(text) => text.trim().to_string(),
            RequestContent::Structured(fields) => {
                let preferred: Vec<&str> = TEXT_KEYS
                    .iter()
                    .filter_map(|key| fields.get(*key).and_then(|v| v.as_str()))
                    .collect();

                if !preferred.is_empty() {
                    return preferred.join(" ").trim().to_string();
                }

                let mut parts = Vec::new();
                for value in fields.values() {
                    collect_strings(value, &mut parts);
                }
                parts.join(" ").trim().to_string()
            }
        }
    }
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Relative urgency of a subtask
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Accepts names ("high") and 1-10 numeric scales as produced by LLMs
    pub fn parse_lenient(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_f64().unwrap_or(5.0) {
                p if p >= 9.0 => Priority::Critical,
                p if p >= 7.0 => Priority::High,
                p if p >= 4.0 => Priority::Normal,
                _ => Priority::Low,
            },
            serde_json::Value::String(s) => match s.to_lowercase().as_str() {
                "critical" | "urgent" => Priority::Critical,
                "high" => Priority::High,
                "low" => Priority::Low,
                _ => Priority::Normal,
            },
            _ => Priority::Normal,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Output of one executed step, with agent and department provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskResult {
    pub subtask_id: String,
    pub step_id: String,
    pub output: serde_json::Value,
    pub success: bool,
    pub confidence: f64,
    #[serde(default)]
    pub error: Option<String>,
    pub agent_type: String,
    pub department: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens_used: u32,
}

impl SubtaskResult {
    pub fn success(
        subtask_id: impl Into<String>,
        department: impl Into<String>,
        agent_type: impl Into<String>,
        output: serde_json::Value,
        confidence: f64,
    ) -> Self {
        let subtask_id = subtask_id.into();
        Self {
            step_id: subtask_id.clone(),
            subtask_id,
            output,
            success: true,
            confidence: confidence.clamp(0.0, 1.0),
            error: None,
            agent_type: agent_type.into(),
            department: department.into(),
            duration_ms: 0,
            tokens_used: 0,
        }
    }

    pub fn failure(
        subtask_id: impl Into<String>,
        department: impl Into<String>,
        agent_type: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let subtask_id = subtask_id.into();
        Self {
            step_id: subtask_id.clone(),
            subtask_id,
            output: serde_json::Value::Null,
            success: false,
            confidence: 0.0,
            error: Some(error.into()),
            agent_type: agent_type.into(),
            department: department.into(),
            duration_ms: 0,
            tokens_used: 0,
        }
    }

    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = step_id.into();
        self
    }

    /// Output as display text; strings are used as-is, other values as compact JSON
    pub fn output_text(&self) -> String {
        match &self.output {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => match map.get("content").and_then(|c| c.as_str()) {
                Some(content) => content.to_string(),
                None => self.output.to_string(),
            },
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_request_is_trimmed() {
        let request = Request::text("  bonjour  ");
        assert_eq!(request.analyzable_text(), "bonjour");
    }

    #[test]
    fn test_structured_request_prefers_known_fields() {
        let fields = json!({
            "title": "Quarterly report",
            "description": "budget review",
            "owner": "finance-team"
        });
        let request = Request::structured(fields.as_object().cloned().unwrap());
        assert_eq!(request.analyzable_text(), "Quarterly report budget review");
    }

    #[test]
    fn test_structured_request_without_known_fields_uses_all_strings() {
        let fields = json!({ "a": "hire", "b": ["two", "engineers"], "n": 3 });
        let request = Request::structured(fields.as_object().cloned().unwrap());
        assert_eq!(request.analyzable_text(), "hire two engineers");
    }

    #[test]
    fn test_priority_parse_lenient() {
        assert_eq!(Priority::parse_lenient(&json!("HIGH")), Priority::High);
        assert_eq!(Priority::parse_lenient(&json!(9)), Priority::Critical);
        assert_eq!(Priority::parse_lenient(&json!(2)), Priority::Low);
        assert_eq!(Priority::parse_lenient(&json!(null)), Priority::Normal);
        assert!(Priority::Critical > Priority::Low);
    }

    #[test]
    fn test_subtask_result_output_text() {
        let text = SubtaskResult::success("a", "finance", "analyst", json!("done"), 0.9);
        let object = SubtaskResult::success(
            "b",
            "finance",
            "analyst",
            json!({"content": "report"}),
            0.9,
        );
        let other = SubtaskResult::success("c", "finance", "analyst", json!({"total": 3}), 1.4);
        let failed = SubtaskResult::failure("d", "finance", "analyst", "boom");

        assert_eq!(text.output_text(), "done");
        assert_eq!(object.output_text(), "report");
        assert_eq!(other.output_text(), r#"{"total":3}"#);
        assert_eq!(other.confidence, 1.0);
        assert_eq!(failed.output_text(), "");
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}

//! Core data model: `Task`, its lifecycle state, and append-only history entries.
//!
//! Field names mirror the Redis hash layout in spec §6 byte-for-byte so that
//! `Task::to_fields` / `Task::from_fields` round-trip against `task:{id}` hashes
//! without a translation layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique task identifier. Opaque by contract; we mint UUIDv4 strings.
pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Summarize,
    PdfExtract,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Summarize => "summarize",
            TaskKind::PdfExtract => "pdf_extract",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summarize" => Ok(TaskKind::Summarize),
            "pdf_extract" => Ok(TaskKind::PdfExtract),
            other => Err(crate::error::CoreError::Other(format!("unknown task kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Active,
    Scheduled,
    Completed,
    Failed,
    Dlq,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Scheduled => "scheduled",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Dlq => "dlq",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Dlq)
    }
}

impl std::str::FromStr for TaskState {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "active" => Ok(TaskState::Active),
            "scheduled" => Ok(TaskState::Scheduled),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "dlq" => Ok(TaskState::Dlq),
            other => Err(crate::error::CoreError::Other(format!("unknown task state: {other}"))),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in `state_history`. Append-only, never rewritten (invariant 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub ts: f64,
    pub state: TaskState,
}

/// One entry in `error_history`. Append-only, never rewritten (invariant 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub ts: f64,
    pub error: String,
    pub kind: String,
    pub retry_count: u32,
    pub state_transition: String,
}

/// The central entity. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub state: TaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub error_kind: Option<String>,
    pub retry_after: Option<f64>,
    pub created_at: f64,
    pub updated_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub failed_at: Option<f64>,
    pub dlq_at: Option<f64>,
    pub worker_id: Option<String>,
    pub result: Option<String>,
    pub error_history: Vec<ErrorHistoryEntry>,
    pub state_history: Vec<StateHistoryEntry>,
}

impl Task {
    pub fn new(id: TaskId, kind: TaskKind, content: String, metadata: HashMap<String, String>, max_retries: u32, now: f64) -> Self {
        Task {
            id,
            kind,
            content,
            metadata,
            state: TaskState::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            error_kind: None,
            retry_after: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            dlq_at: None,
            worker_id: None,
            result: None,
            error_history: Vec::new(),
            state_history: vec![StateHistoryEntry {
                ts: now,
                state: TaskState::Pending,
            }],
        }
    }

    /// Invariant 1: `state` must equal the last `state_history` entry.
    pub fn state_matches_history(&self) -> bool {
        self.state_history.last().map(|e| e.state) == Some(self.state)
    }

    /// Serialize into the Redis hash field layout of spec §6.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("task_id".to_string(), self.id.clone()),
            ("kind".to_string(), self.kind.as_str().to_string()),
            ("content".to_string(), self.content.clone()),
            ("metadata".to_string(), serde_json::to_string(&self.metadata).unwrap_or_default()),
            ("state".to_string(), self.state.as_str().to_string()),
            ("retry_count".to_string(), self.retry_count.to_string()),
            ("max_retries".to_string(), self.max_retries.to_string()),
            ("created_at".to_string(), self.created_at.to_string()),
            ("updated_at".to_string(), self.updated_at.to_string()),
            (
                "error_history".to_string(),
                serde_json::to_string(&self.error_history).unwrap_or_default(),
            ),
            (
                "state_history".to_string(),
                serde_json::to_string(&self.state_history).unwrap_or_default(),
            ),
        ];
        if let Some(v) = &self.last_error {
            fields.push(("last_error".to_string(), v.clone()));
        }
        if let Some(v) = &self.error_kind {
            fields.push(("error_kind".to_string(), v.clone()));
        }
        if let Some(v) = self.retry_after {
            fields.push(("retry_after".to_string(), v.to_string()));
        }
        if let Some(v) = self.started_at {
            fields.push(("started_at".to_string(), v.to_string()));
        }
        if let Some(v) = self.completed_at {
            fields.push(("completed_at".to_string(), v.to_string()));
        }
        if let Some(v) = self.failed_at {
            fields.push(("failed_at".to_string(), v.to_string()));
        }
        if let Some(v) = self.dlq_at {
            fields.push(("dlq_at".to_string(), v.to_string()));
        }
        if let Some(v) = &self.worker_id {
            fields.push(("worker_id".to_string(), v.clone()));
        }
        if let Some(v) = &self.result {
            fields.push(("result".to_string(), v.clone()));
        }
        fields
    }

    /// Deserialize from a raw Redis hash. Returns `None` if required fields are missing.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let id = fields.get("task_id")?.clone();
        let kind = fields.get("kind")?.parse().ok()?;
        let content = fields.get("content").cloned().unwrap_or_default();
        let metadata = fields
            .get("metadata")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let state = fields.get("state")?.parse().ok()?;
        let retry_count = fields.get("retry_count")?.parse().ok()?;
        let max_retries = fields.get("max_retries")?.parse().ok()?;
        let created_at = fields.get("created_at")?.parse().ok()?;
        let updated_at = fields.get("updated_at")?.parse().ok()?;
        let error_history = fields
            .get("error_history")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let state_history = fields
            .get("state_history")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();

        Some(Task {
            id,
            kind,
            content,
            metadata,
            state,
            retry_count,
            max_retries,
            last_error: fields.get("last_error").cloned(),
            error_kind: fields.get("error_kind").cloned(),
            retry_after: fields.get("retry_after").and_then(|s| s.parse().ok()),
            created_at,
            updated_at,
            started_at: fields.get("started_at").and_then(|s| s.parse().ok()),
            completed_at: fields.get("completed_at").and_then(|s| s.parse().ok()),
            failed_at: fields.get("failed_at").and_then(|s| s.parse().ok()),
            dlq_at: fields.get("dlq_at").and_then(|s| s.parse().ok()),
            worker_id: fields.get("worker_id").cloned(),
            result: fields.get("result").cloned(),
            error_history,
            state_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_fields() {
        let task = Task::new(
            "t-1".to_string(),
            TaskKind::Summarize,
            "hello".to_string(),
            HashMap::new(),
            5,
            1000.0,
        );
        let fields: HashMap<String, String> = task.to_fields().into_iter().collect();
        let back = Task::from_fields(&fields).expect("round trip");
        assert_eq!(back.id, task.id);
        assert_eq!(back.state, TaskState::Pending);
        assert_eq!(back.state_history.len(), 1);
        assert!(back.state_matches_history());
    }
}

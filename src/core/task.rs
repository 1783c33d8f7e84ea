//! Durable task records for the task engine.
//!
//! A task is one queued unit of work: a type tag that selects the handler,
//! plus a JSON parameter payload. Each status transition is persisted by
//! the engine so a crash leaves a resumable record behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

uuid_id!(
    /// Unique identifier for a task.
    TaskId
);

/// Task status in its lifecycle.
///
/// Pending -> InProgress -> Completed | Failed. There are no automatic
/// retries; a failed task keeps its error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Enqueued, not yet picked up by the worker.
    Pending,
    /// Currently executing on the worker.
    InProgress,
    /// Handler returned successfully.
    Completed,
    /// Handler returned an error or panicked.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// A single queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Selects the registered handler.
    pub task_type: String,
    /// Handler input.
    pub params: serde_json::Value,
    /// Current execution status.
    pub status: TaskStatus,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the worker last started it.
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a Pending task with a fresh id.
    pub fn new(task_type: &str, params: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.to_string(),
            params,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Put a task found unfinished at startup back into the queue state.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.started_at = None;
    }

    /// Check if the task is in a terminal state (Completed or Failed).
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. }
        )
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

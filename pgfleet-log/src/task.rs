//! Task model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What a task does to its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Create,
    Update,
    Delete,
    NodeBackup,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Create => "create",
            TaskType::Update => "update",
            TaskType::Delete => "delete",
            TaskType::NodeBackup => "node_backup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
    Unknown,
}

impl TaskStatus {
    /// Completed, failed and canceled tasks never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// A unit of user-visible work against one reconciliation scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub scope: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(scope: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            scope: scope.into(),
            task_type,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Running)
    }

    pub fn complete(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed)
    }

    /// Marks the task failed and captures the error message for the task API.
    pub fn fail(&mut self, error: impl fmt::Display) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Canceled)
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                task_id: self.task_id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

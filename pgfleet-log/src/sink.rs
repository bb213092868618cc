//! Task sinks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::task::Task;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// One streamed log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogLine {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Destination for task status and log lines, read by the user-facing task API.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Store the current snapshot of a task.
    async fn record(&self, task: &Task) -> Result<(), SinkError>;

    /// Append a log line to an already recorded task.
    async fn append_log(&self, task_id: Uuid, line: LogLine) -> Result<(), SinkError>;
}

#[derive(Default)]
struct Entry {
    task: Option<Task>,
    lines: Vec<LogLine>,
}

/// In-process task sink.
#[derive(Default)]
pub struct MemoryTaskSink {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl MemoryTaskSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task(&self, task_id: Uuid) -> Option<Task> {
        self.entries
            .read()
            .await
            .get(&task_id)
            .and_then(|e| e.task.clone())
    }

    pub async fn logs(&self, task_id: Uuid) -> Vec<LogLine> {
        self.entries
            .read()
            .await
            .get(&task_id)
            .map(|e| e.lines.clone())
            .unwrap_or_default()
    }

    /// Tasks for a scope, oldest first.
    pub async fn tasks_for_scope(&self, scope: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .entries
            .read()
            .await
            .values()
            .filter_map(|e| e.task.clone())
            .filter(|t| t.scope == scope)
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

#[async_trait]
impl TaskSink for MemoryTaskSink {
    async fn record(&self, task: &Task) -> Result<(), SinkError> {
        let mut entries = self.entries.write().await;
        entries.entry(task.task_id).or_default().task = Some(task.clone());
        Ok(())
    }

    async fn append_log(&self, task_id: Uuid, line: LogLine) -> Result<(), SinkError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&task_id) {
            Some(entry) if entry.task.is_some() => {
                entry.lines.push(line);
                Ok(())
            }
            _ => Err(SinkError::TaskNotFound(task_id)),
        }
    }
}

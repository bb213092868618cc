//! Task logger
//!
//! Non-blocking for the caller's control flow: lines are always logged locally
//! via tracing, and a failing sink is reported and otherwise ignored.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::sink::{LogLine, TaskSink};
use crate::task::{Task, TaskStatus};

/// Logger bound to a single task.
#[derive(Clone)]
pub struct TaskLogger {
    sink: Option<Arc<dyn TaskSink>>,
    task_id: Uuid,
    component: String,
}

impl TaskLogger {
    pub fn new(sink: Arc<dyn TaskSink>, task_id: Uuid, component: &str) -> Self {
        Self {
            sink: Some(sink),
            task_id,
            component: component.to_string(),
        }
    }

    /// Logger that only writes to tracing (for tests and dry runs).
    pub fn new_noop() -> Self {
        Self {
            sink: None,
            task_id: Uuid::nil(),
            component: String::new(),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Append a line to the task log.
    pub async fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "task", component = %self.component, task_id = %self.task_id, "{}", message);

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append_log(self.task_id, LogLine::now(message)).await {
                warn!(error = %e, task_id = %self.task_id, "Failed to append task log line");
            }
        }
    }

    /// Record a task status snapshot.
    pub async fn record(&self, task: &Task) {
        match task.status {
            TaskStatus::Failed => {
                tracing::error!(target: "task", component = %self.component, task_id = %task.task_id, error = ?task.error, "Task {} failed", task.task_type)
            }
            status => {
                tracing::info!(target: "task", component = %self.component, task_id = %task.task_id, "Task {} {}", task.task_type, status)
            }
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(task).await {
                warn!(error = %e, task_id = %task.task_id, "Failed to record task status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryTaskSink;
    use crate::task::TaskType;

    #[tokio::test]
    async fn test_logger_forwards_to_sink() {
        let sink = Arc::new(MemoryTaskSink::new());
        let mut task = Task::new("db-1", TaskType::Create);
        let logger = TaskLogger::new(sink.clone(), task.task_id, "cp");

        task.start().unwrap();
        logger.record(&task).await;
        logger.log("creating swarm.network::db-1-database on host-a").await;

        let lines = sink.logs(task.task_id).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].message,
            "creating swarm.network::db-1-database on host-a"
        );
        assert_eq!(
            sink.task(task.task_id).await.map(|t| t.status),
            Some(TaskStatus::Running)
        );
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_propagate() {
        let sink = Arc::new(MemoryTaskSink::new());
        // Task was never recorded, so the sink rejects the line.
        let logger = TaskLogger::new(sink.clone(), Uuid::new_v4(), "cp");
        logger.log("dropped").await;
        assert!(sink.logs(logger.task_id()).await.is_empty());
    }

    #[tokio::test]
    async fn test_noop_logger() {
        let logger = TaskLogger::new_noop();
        logger.log("only traced").await;
        assert!(logger.task_id().is_nil());
    }
}

//! pgfleet task log
//!
//! Tracks task status transitions and the log lines streamed while a task runs.
//! Every line is mirrored to `tracing` so a process without a task sink still
//! records what happened.
//!
//! # Example
//! ```ignore
//! use pgfleet_log::{MemoryTaskSink, Task, TaskLogger, TaskType};
//!
//! let sink = Arc::new(MemoryTaskSink::new());
//! let mut task = Task::new("db-1", TaskType::Create);
//! let logger = TaskLogger::new(sink.clone(), task.task_id, "cp");
//!
//! task.start()?;
//! logger.record(&task).await;
//! logger.log("creating swarm.network::db-1-database on host-a").await;
//! ```

mod logger;
mod sink;
mod task;

pub use logger::TaskLogger;
pub use sink::{LogLine, MemoryTaskSink, SinkError, TaskSink};
pub use task::{Task, TaskError, TaskStatus, TaskType};

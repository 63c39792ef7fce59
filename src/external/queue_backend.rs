use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::JobConfig;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue serialization error: {0}")]
    Serialization(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(value: redis::RedisError) -> Self {
        QueueError::Connection(value.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        QueueError::Serialization(value.to_string())
    }
}

/// Completion callback the worker runs against the task's job unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskHook {
    EndJobUnit,
    FailJobUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub job_unit_id: i64,
}

/// Everything a worker needs to rebuild and run a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub job_class: String,
    pub config: JobConfig,
    pub definition_id: Option<i64>,
    pub timeout_secs: u64,
    pub on_success: TaskHook,
    pub on_failure: TaskHook,
    pub meta: TaskMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Started => "started",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub token: String,
    pub queue: String,
    pub envelope: TaskEnvelope,
    pub status: TaskStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn queued(token: String, queue: &str, envelope: TaskEnvelope) -> Self {
        Self {
            token,
            queue: queue.to_string(),
            envelope,
            status: TaskStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn apply_status(&mut self, status: TaskStatus, error: Option<String>) {
        let now = Utc::now();
        match status {
            TaskStatus::Started => self.started_at = Some(now),
            TaskStatus::Finished | TaskStatus::Failed => self.ended_at = Some(now),
            TaskStatus::Queued => {}
        }
        self.status = status;
        if error.is_some() {
            self.error = error;
        }
    }
}

/// A named-FIFO task queue. Tasks within one queue dequeue in enqueue order.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<TaskRecord, QueueError>;

    async fn fetch(&self, token: &str) -> Result<Option<TaskRecord>, QueueError>;

    /// Pops the oldest queued task, or `None` when the queue is empty.
    async fn dequeue(&self, queue: &str) -> Result<Option<TaskRecord>, QueueError>;

    async fn update_status(
        &self,
        token: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), QueueError>;
}

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{error, info};

use crate::errors::JobError;
use crate::external::queue_backend::{QueueBackend, TaskEnvelope, TaskHook, TaskMeta, TaskRecord, TaskStatus};
use crate::jobs::Job;
use crate::services::job_unit_service::JobUnit;
use crate::store::JobStore;

pub const DEFAULT_QUEUE: &str = "default";
pub const LONG_QUEUE: &str = "long";
pub const SHORT_QUEUE: &str = "short";

/// Queue names workers consume by default. Anything else would never be dequeued.
pub const KNOWN_QUEUES: [&str; 3] = [SHORT_QUEUE, DEFAULT_QUEUE, LONG_QUEUE];

pub fn validate_queue_name(name: &str) -> Result<(), JobError> {
    if KNOWN_QUEUES.contains(&name) {
        Ok(())
    } else {
        Err(JobError::Config(format!(
            "unknown queue '{}', expected one of {}",
            name,
            KNOWN_QUEUES.join(", ")
        )))
    }
}

/// Config key that overrides the queue's wall-clock timeout for one task.
pub const TIMEOUT_CONFIG_KEY: &str = "timeout_secs";

/// Pollable result of `put`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskHandle {
    pub token: String,
    pub job_unit_id: i64,
    pub queue: String,
    pub status: TaskStatus,
}

/// One named queue bound to the shared backend connection and job store.
pub struct WorkQueue {
    name: String,
    backend: Arc<dyn QueueBackend>,
    store: Arc<dyn JobStore>,
    default_timeout_secs: u64,
}

impl WorkQueue {
    pub fn new(
        name: &str,
        backend: Arc<dyn QueueBackend>,
        store: Arc<dyn JobStore>,
        default_timeout_secs: u64,
    ) -> Self {
        Self { name: name.to_string(), backend, store, default_timeout_secs }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the job unit and enqueues the job as one operation.
    ///
    /// The unit row, its ledger row and the queue token share one transaction.
    /// If the backend rejects the task the transaction is dropped, so no CREATED
    /// unit survives.
    pub async fn put(&self, job: &dyn Job) -> Result<TaskHandle, JobError> {
        job.validate()?;

        let job_class = job.kind().as_str();
        let timeout_secs = match job.config().get_i64(TIMEOUT_CONFIG_KEY)? {
            Some(secs) if secs > 0 => secs as u64,
            _ => self.default_timeout_secs,
        };

        let mut tx = self.store.begin().await?;
        let unit = JobUnit::insert_in(tx.as_mut(), job_class, job.definition_id()).await?;

        let envelope = TaskEnvelope {
            job_class: job_class.to_string(),
            config: job.config().clone(),
            definition_id: job.definition_id(),
            timeout_secs,
            on_success: TaskHook::EndJobUnit,
            on_failure: TaskHook::FailJobUnit,
            meta: TaskMeta { job_unit_id: unit.id },
        };

        let task = self.backend.enqueue(&self.name, &envelope).await.map_err(|e| {
            error!("Failed to enqueue {} on '{}': {}", job_class, self.name, e);
            e
        })?;

        tx.set_queue_token(unit.id, &task.token).await?;
        // A failed commit here leaves a task whose unit never appears; the worker fails it.
        tx.commit().await?;

        info!("Enqueued {} as job unit {} on '{}' (task {})", job_class, unit.id, self.name, task.token);

        Ok(TaskHandle {
            token: task.token,
            job_unit_id: unit.id,
            queue: self.name.clone(),
            status: task.status,
        })
    }

    pub async fn find_job(&self, token: &str) -> Result<Option<TaskRecord>, JobError> {
        Ok(self.backend.fetch(token).await?)
    }
}

/// Process-wide cache of named queues, owned by startup and shared through `AppState`.
pub struct QueueRegistry {
    backend: Arc<dyn QueueBackend>,
    store: Arc<dyn JobStore>,
    default_timeout_secs: u64,
    queues: DashMap<String, Arc<WorkQueue>>,
}

impl QueueRegistry {
    pub fn new(backend: Arc<dyn QueueBackend>, store: Arc<dyn JobStore>, default_timeout_secs: u64) -> Self {
        Self { backend, store, default_timeout_secs, queues: DashMap::new() }
    }

    /// Returns the queue for `name`, constructing it on first use.
    pub fn get_queue(&self, name: &str) -> Arc<WorkQueue> {
        if let Some(queue) = self.queues.get(name) {
            return queue.clone();
        }
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Opening work queue '{}'", name);
                Arc::new(WorkQueue::new(
                    name,
                    self.backend.clone(),
                    self.store.clone(),
                    self.default_timeout_secs,
                ))
            })
            .clone()
    }

    /// Tokens are unique across queues.
    pub async fn find_job(&self, token: &str) -> Result<Option<TaskRecord>, JobError> {
        Ok(self.backend.fetch(token).await?)
    }

    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }
}

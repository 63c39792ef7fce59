use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::external::queue_backend::{QueueBackend, QueueError, TaskEnvelope, TaskRecord, TaskStatus};

/// Process-local queue backend used by tests and single-process deployments.
#[derive(Clone, Default)]
pub struct MemoryQueueBackend {
    queues: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    tasks: Arc<DashMap<String, TaskRecord>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the connection: every call fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn pending(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map(|q| q.len()).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("memory queue backend is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<TaskRecord, QueueError> {
        self.check_available()?;
        let token = Uuid::new_v4().to_string();
        let record = TaskRecord::queued(token.clone(), queue, envelope.clone());

        self.tasks.insert(token.clone(), record.clone());
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(token);
        Ok(record)
    }

    async fn fetch(&self, token: &str) -> Result<Option<TaskRecord>, QueueError> {
        self.check_available()?;
        Ok(self.tasks.get(token).map(|t| t.value().clone()))
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<TaskRecord>, QueueError> {
        self.check_available()?;
        let token = self.queues.lock().get_mut(queue).and_then(|q| q.pop_front());
        match token {
            Some(token) => self
                .tasks
                .get(&token)
                .map(|t| Some(t.value().clone()))
                .ok_or(QueueError::TaskNotFound(token)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        token: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        self.check_available()?;
        let mut task = self
            .tasks
            .get_mut(token)
            .ok_or_else(|| QueueError::TaskNotFound(token.to_string()))?;
        task.apply_status(status, error);
        Ok(())
    }
}

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::external::queue_backend::{QueueBackend, QueueError, TaskEnvelope, TaskRecord, TaskStatus};

// Finished and failed tasks stay pollable for a week.
const TERMINAL_TASK_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Redis-backed FIFO queues: `LPUSH` on enqueue, `RPOP` on dequeue, one JSON
/// document per task under `stockcast:task:{token}`.
#[derive(Clone)]
pub struct RedisQueueBackend {
    manager: ConnectionManager,
}

impl RedisQueueBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("📮 Connected queue backend to Redis");
        Ok(Self { manager })
    }

    fn queue_key(queue: &str) -> String {
        format!("stockcast:queue:{}", queue)
    }

    fn task_key(token: &str) -> String {
        format!("stockcast:task:{}", token)
    }

    async fn write_task(&self, record: &TaskRecord) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(record)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::task_key(&record.token)).arg(payload);
        if matches!(record.status, TaskStatus::Finished | TaskStatus::Failed) {
            cmd.arg("EX").arg(TERMINAL_TASK_TTL_SECS);
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> Result<TaskRecord, QueueError> {
        let token = Uuid::new_v4().to_string();
        let record = TaskRecord::queued(token.clone(), queue, envelope.clone());
        let payload = serde_json::to_string(&record)?;

        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .cmd("SET").arg(Self::task_key(&token)).arg(payload).ignore()
            .cmd("LPUSH").arg(Self::queue_key(queue)).arg(&token).ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!("Enqueued task {} on {}", token, queue);
        Ok(record)
    }

    async fn fetch(&self, token: &str) -> Result<Option<TaskRecord>, QueueError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::task_key(token))
            .query_async(&mut conn)
            .await?;

        raw.map(|s| serde_json::from_str(&s).map_err(QueueError::from))
            .transpose()
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<TaskRecord>, QueueError> {
        let mut conn = self.manager.clone();
        let token: Option<String> = redis::cmd("RPOP")
            .arg(Self::queue_key(queue))
            .query_async(&mut conn)
            .await?;

        match token {
            Some(token) => self
                .fetch(&token)
                .await?
                .map(Some)
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
        let mut record = self
            .fetch(token)
            .await?
            .ok_or_else(|| QueueError::TaskNotFound(token.to_string()))?;
        record.apply_status(status, error);
        self.write_task(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(RedisQueueBackend::queue_key("long"), "stockcast:queue:long");
        assert_eq!(RedisQueueBackend::task_key("abc"), "stockcast:task:abc");
    }
}

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::errors::{AppError, JobError};
use crate::jobs::JobRegistry;
use crate::models::JobDefinition;
use crate::services::queue_service::{validate_queue_name, QueueRegistry, TaskHandle};
use crate::store::JobStore;

/// Enqueues scheduled job definitions on their cron expressions.
///
/// The scheduler only enqueues; workers do the actual running, so a slow job
/// never delays the next tick of another definition.
pub struct JobSchedulerService {
    scheduler: JobScheduler,
    store: Arc<dyn JobStore>,
    queues: Arc<QueueRegistry>,
    jobs: Arc<JobRegistry>,
}

impl JobSchedulerService {
    pub async fn new(
        store: Arc<dyn JobStore>,
        queues: Arc<QueueRegistry>,
        jobs: Arc<JobRegistry>,
    ) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self { scheduler, store, queues, jobs })
    }

    /// Schedules every enabled definition that has a cron expression and starts ticking.
    pub async fn start(&mut self) -> Result<usize, AppError> {
        info!("Starting job scheduler...");

        let definitions = self.store.list_definitions().await?;
        let mut scheduled = 0;
        for definition in scheduled_definitions(definitions) {
            let name = definition.display_name.clone();
            match self.schedule_definition(definition).await {
                Ok(()) => scheduled += 1,
                // One bad expression must not keep the others from running
                Err(e) => error!("Failed to schedule '{}': {}", name, e),
            }
        }

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        info!("Job scheduler started with {} scheduled definition(s)", scheduled);
        Ok(scheduled)
    }

    pub async fn stop(&mut self) -> Result<(), AppError> {
        info!("Stopping job scheduler...");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        info!("Job scheduler stopped");
        Ok(())
    }

    async fn schedule_definition(&mut self, definition: JobDefinition) -> Result<(), AppError> {
        let schedule = definition.schedule.clone().unwrap_or_default();
        // Fail fast on unknown classes instead of at every tick
        if !self.jobs.is_registered(&definition.job_class) {
            return Err(JobError::UnknownJobType(definition.job_class.clone()).into());
        }

        let queues = self.queues.clone();
        let jobs = self.jobs.clone();
        let definition = Arc::new(definition);
        let name = definition.display_name.clone();

        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let queues = queues.clone();
            let jobs = jobs.clone();
            let definition = definition.clone();
            Box::pin(async move {
                match enqueue_definition(&queues, &jobs, &definition).await {
                    Ok(handle) => info!(
                        "Scheduled run of '{}' enqueued as job unit {} (task {})",
                        definition.display_name, handle.job_unit_id, handle.token
                    ),
                    Err(e) => error!("Scheduled run of '{}' failed to enqueue: {}", definition.display_name, e),
                }
            })
        })
        .map_err(|e| AppError::Validation(format!("Invalid schedule '{}' for {}: {}", schedule, name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", name, e)))?;

        info!("Scheduled: {} [cron: {}]", name, schedule);
        Ok(())
    }
}

/// Enabled definitions that carry a cron expression.
pub fn scheduled_definitions(definitions: Vec<JobDefinition>) -> Vec<JobDefinition> {
    definitions
        .into_iter()
        .filter(|d| {
            let has_schedule = d.schedule.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
            if has_schedule && !d.enabled {
                warn!("Skipping disabled definition '{}'", d.display_name);
            }
            d.enabled && has_schedule
        })
        .collect()
}

/// Builds a fresh job from the definition and puts it on the definition's queue.
pub async fn enqueue_definition(
    queues: &QueueRegistry,
    jobs: &JobRegistry,
    definition: &JobDefinition,
) -> Result<TaskHandle, JobError> {
    validate_queue_name(&definition.queue_name)?;
    let job = jobs.instantiate(definition)?;
    queues.get_queue(&definition.queue_name).put(job.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::memory_queue::MemoryQueueBackend;
    use crate::jobs::JobConfig;
    use crate::store::MemoryJobStore;
    use chrono::Utc;
    use sqlx::types::Json;

    fn definition(name: &str, enabled: bool, schedule: Option<&str>) -> JobDefinition {
        JobDefinition {
            id: 1,
            display_name: name.to_string(),
            default_config: Json(JobConfig::new().with("ticker", "AAPL")),
            job_class: "seed_sma".to_string(),
            enabled,
            queue_name: "short".to_string(),
            schedule: schedule.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_only_enabled_scheduled_definitions() {
        let picked = scheduled_definitions(vec![
            definition("nightly", true, Some("0 0 2 * * *")),
            definition("paused", false, Some("0 0 3 * * *")),
            definition("manual", true, None),
            definition("blank", true, Some("  ")),
        ]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].display_name, "nightly");
    }

    #[tokio::test]
    async fn test_enqueue_definition_uses_definition_queue() {
        let store = MemoryJobStore::new();
        let backend = MemoryQueueBackend::new();
        let queues = QueueRegistry::new(Arc::new(backend.clone()), Arc::new(store.clone()), 60);
        let jobs = JobRegistry::with_defaults();

        let handle = enqueue_definition(&queues, &jobs, &definition("nightly", true, None))
            .await
            .unwrap();

        assert_eq!(handle.queue, "short");
        assert_eq!(backend.pending("short"), 1);
        let unit = store.find_unit(handle.job_unit_id).await.unwrap().unwrap();
        assert_eq!(unit.job_def_id, Some(1));
    }

    #[tokio::test]
    async fn test_stored_definition_with_unknown_queue_is_not_enqueued() {
        let store = MemoryJobStore::new();
        let backend = MemoryQueueBackend::new();
        let queues = QueueRegistry::new(Arc::new(backend.clone()), Arc::new(store.clone()), 60);
        let jobs = JobRegistry::with_defaults();

        let mut stale = definition("nightly", true, Some("0 0 2 * * *"));
        stale.queue_name = "retired".to_string();

        let err = enqueue_definition(&queues, &jobs, &stale).await.unwrap_err();
        assert!(matches!(err, JobError::Config(_)));
        assert_eq!(backend.pending("retired"), 0);
        assert_eq!(store.count_units().await.unwrap(), 0);
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::errors::JobError;
use crate::external::queue_backend::{QueueBackend, TaskHook, TaskRecord, TaskStatus};
use crate::jobs::{JobContext, JobRegistry};
use crate::models::JobUnitState;
use crate::services::job_unit_service::JobUnit;

const UNIT_LOOKUP_ATTEMPTS: u32 = 5;
const UNIT_LOOKUP_DELAY: Duration = Duration::from_millis(200);
/// How long a unit the worker gave up on is re-checked before its enqueue is assumed rolled back.
const ORPHAN_RETENTION: Duration = Duration::from_secs(15 * 60);

/// What happened to one dequeued task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub token: String,
    pub job_unit_id: i64,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Pulls tasks from its queues, in the order given, and runs them one at a time.
pub struct Worker {
    name: String,
    queues: Vec<String>,
    backend: Arc<dyn QueueBackend>,
    jobs: Arc<JobRegistry>,
    ctx: JobContext,
    poll_interval: Duration,
    lookup_delay: Duration,
    in_flight: DashMap<i64, Arc<JobUnit>>,
    /// Units whose task failed before their row was visible, with the task token.
    orphans: DashMap<i64, (String, Instant)>,
}

impl Worker {
    pub fn new(
        name: &str,
        queues: Vec<String>,
        backend: Arc<dyn QueueBackend>,
        jobs: Arc<JobRegistry>,
        ctx: JobContext,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            queues,
            backend,
            jobs,
            ctx,
            poll_interval,
            lookup_delay: UNIT_LOOKUP_DELAY,
            in_flight: DashMap::new(),
            orphans: DashMap::new(),
        }
    }

    /// Shortens the wait between unit lookups; tests use zero.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// Runs until `shutdown` flips to true. A task already running is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Worker '{}' listening on {:?}", self.name, self.queues);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.work_once().await {
                Ok(Some(outcome)) => {
                    debug!("Worker '{}' finished task {} as {}", self.name, outcome.token, outcome.status);
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!("Worker '{}' failed to poll queues: {}", self.name, e),
            }

            let jitter = rand::rng().random_range(0..=self.poll_interval.as_millis() as u64 / 4);
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval + Duration::from_millis(jitter)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Worker '{}' stopped", self.name);
    }

    /// Processes at most one task; `None` when every queue is empty.
    ///
    /// Idle polls also reconcile units whose enqueue committed after their task gave up.
    pub async fn work_once(&self) -> Result<Option<TaskOutcome>, JobError> {
        for queue in &self.queues {
            if let Some(task) = self.backend.dequeue(queue).await? {
                return Ok(Some(self.process(task).await));
            }
        }
        self.sweep_orphans().await;
        Ok(None)
    }

    /// Fails units that became visible after their task was already marked failed.
    /// Returns how many units were failed.
    pub async fn sweep_orphans(&self) -> usize {
        if self.orphans.is_empty() {
            return 0;
        }

        let pending: Vec<(i64, String, Instant)> = self
            .orphans
            .iter()
            .map(|entry| (*entry.key(), entry.value().0.clone(), entry.value().1))
            .collect();

        let mut failed = 0;
        for (unit_id, token, since) in pending {
            let unit = match JobUnit::load(self.ctx.store.clone(), unit_id).await {
                Ok(unit) => unit,
                Err(JobError::NotFound(_)) => {
                    if since.elapsed() >= ORPHAN_RETENTION {
                        info!("Job unit {} for task {} never appeared, assuming its enqueue rolled back", unit_id, token);
                        self.orphans.remove(&unit_id);
                    }
                    continue;
                }
                Err(e) => {
                    warn!("Could not re-check job unit {} for task {}: {}", unit_id, token, e);
                    continue;
                }
            };

            self.orphans.remove(&unit_id);
            if unit.state().await != JobUnitState::Created {
                continue;
            }

            let message = format!("Task {} failed before this unit was committed", token);
            let result = match unit.log(message).await {
                Ok(()) => unit.fail_job().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    warn!("Failed job unit {} left CREATED by task {}", unit_id, token);
                    failed += 1;
                }
                Err(e) => error!("Could not fail orphaned job unit {}: {}", unit_id, e),
            }
        }
        failed
    }

    async fn process(&self, task: TaskRecord) -> TaskOutcome {
        let unit_id = task.envelope.meta.job_unit_id;
        let token = task.token.clone();

        if let Err(e) = self.backend.update_status(&token, TaskStatus::Started, None).await {
            warn!("Could not mark task {} started: {}", token, e);
        }

        let unit = match self.resolve_unit(unit_id).await {
            Ok(unit) => unit,
            Err(JobError::NotFound(_)) => {
                // The enqueuing commit may still land; the sweep fails the unit if it does
                error!(
                    "Task {} gave up on job unit {} after {} lookups; will fail the unit if it appears",
                    token, unit_id, UNIT_LOOKUP_ATTEMPTS
                );
                self.orphans.insert(unit_id, (token.clone(), Instant::now()));
                let e = JobError::NotFound(format!(
                    "job unit {} for task {} not committed after {} lookups",
                    unit_id, token, UNIT_LOOKUP_ATTEMPTS
                ));
                return self.finish_task(&token, unit_id, Err(e)).await;
            }
            Err(e) => {
                error!("Task {} has no usable job unit {}: {}", token, unit_id, e);
                return self.finish_task(&token, unit_id, Err(e)).await;
            }
        };
        self.in_flight.insert(unit_id, unit.clone());

        let result = self.execute(&task, &unit).await;

        let outcome = match result {
            Ok(()) => match self.run_hook(task.envelope.on_success, unit_id).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!("Success hook failed for job unit {}: {}", unit_id, e);
                    Err(e)
                }
            },
            Err(job_error) => {
                warn!("Job unit {} ({}) raised: {}", unit_id, task.envelope.job_class, job_error);
                if let Err(e) = self.run_hook(task.envelope.on_failure, unit_id).await {
                    error!("Failure hook failed for job unit {}: {}", unit_id, e);
                }
                // Re-raise so the task itself is recorded as failed
                Err(job_error)
            }
        };

        self.in_flight.remove(&unit_id);
        self.finish_task(&token, unit_id, outcome).await
    }

    async fn execute(&self, task: &TaskRecord, unit: &JobUnit) -> Result<(), JobError> {
        let envelope = &task.envelope;
        let job = self
            .jobs
            .build(&envelope.job_class, envelope.config.clone(), envelope.definition_id)?;

        info!("Running {} for job unit {} (timeout {}s)", envelope.job_class, unit.id(), envelope.timeout_secs);
        match tokio::time::timeout(Duration::from_secs(envelope.timeout_secs), job.run(unit, &self.ctx)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(envelope.timeout_secs)),
        }
    }

    /// The enqueuing transaction may commit shortly after the task becomes visible.
    async fn resolve_unit(&self, unit_id: i64) -> Result<Arc<JobUnit>, JobError> {
        for attempt in 1..=UNIT_LOOKUP_ATTEMPTS {
            match JobUnit::load(self.ctx.store.clone(), unit_id).await {
                Ok(unit) => return Ok(Arc::new(unit)),
                Err(JobError::NotFound(_)) if attempt < UNIT_LOOKUP_ATTEMPTS => {
                    debug!("Job unit {} not visible yet (attempt {})", unit_id, attempt);
                    tokio::time::sleep(self.lookup_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(JobError::NotFound(format!("job unit {}", unit_id)))
    }

    /// Re-resolves the unit by id, preferring the in-process handle so buffered stats are flushed.
    async fn run_hook(&self, hook: TaskHook, unit_id: i64) -> Result<(), JobError> {
        let cached = self.in_flight.get(&unit_id).map(|u| u.value().clone());
        let unit = match cached {
            Some(unit) => unit,
            None => Arc::new(JobUnit::load(self.ctx.store.clone(), unit_id).await?),
        };

        match hook {
            TaskHook::EndJobUnit => unit.end_job().await,
            TaskHook::FailJobUnit => unit.fail_job().await,
        }
    }

    async fn finish_task(&self, token: &str, unit_id: i64, result: Result<(), JobError>) -> TaskOutcome {
        let (status, error) = match result {
            Ok(()) => (TaskStatus::Finished, None),
            Err(e) => (TaskStatus::Failed, Some(e.to_string())),
        };

        if let Err(e) = self.backend.update_status(token, status, error.clone()).await {
            error!("Could not record status {} for task {}: {}", status, token, e);
        }

        TaskOutcome { token: token.to_string(), job_unit_id: unit_id, status, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::market_data_provider::ProviderError;
    use crate::external::memory_queue::MemoryQueueBackend;
    use crate::external::queue_backend::{TaskEnvelope, TaskMeta};
    use crate::jobs::seed_sma_job::SeedSmaJob;
    use crate::jobs::test_support::{harness, listing, Harness};
    use crate::jobs::{Job, JobBase, JobConfig, JobKind};
    use crate::models::{JobUnitRecord, NewTicker};
    use crate::services::queue_service::{QueueRegistry, LONG_QUEUE};
    use crate::store::{JobStore, MarketStore};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Stands in for a seeder: records a stat, then sleeps or fails on request.
    #[derive(Default)]
    struct ScriptedJob {
        base: JobBase,
    }

    #[async_trait]
    impl Job for ScriptedJob {
        fn kind(&self) -> JobKind {
            JobKind::SeedSma
        }

        fn base(&self) -> &JobBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut JobBase {
            &mut self.base
        }

        async fn execute(&self, unit: &JobUnit, _ctx: &JobContext) -> Result<(), JobError> {
            unit.accumulate("loss", 1.0).await?;
            unit.accumulate("loss", 2.0).await?;
            if let Some(ms) = self.config().get_i64("sleep_ms")? {
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
            }
            if let Some(msg) = self.config().get_str("fail")? {
                return Err(ProviderError::BadResponse(msg.to_string()).into());
            }
            Ok(())
        }
    }

    fn scripted_registry() -> Arc<JobRegistry> {
        let mut jobs = JobRegistry::new();
        jobs.register(JobKind::SeedSma, Arc::new(|| Box::new(ScriptedJob::default())));
        Arc::new(jobs)
    }

    fn setup(jobs: Arc<JobRegistry>) -> (Harness, MemoryQueueBackend, QueueRegistry, Worker) {
        let h = harness();
        let backend = MemoryQueueBackend::new();
        let queues = QueueRegistry::new(Arc::new(backend.clone()), h.ctx.store.clone(), 5);
        let worker = Worker::new(
            "test",
            vec![LONG_QUEUE.to_string()],
            Arc::new(backend.clone()),
            jobs,
            h.ctx.clone(),
            Duration::from_millis(10),
        )
        .with_lookup_delay(Duration::ZERO);
        (h, backend, queues, worker)
    }

    fn scripted(config: JobConfig) -> ScriptedJob {
        let mut job = ScriptedJob::default();
        job.configure(config);
        job
    }

    #[tokio::test]
    async fn test_success_ends_unit_and_flushes_stats() {
        let (h, backend, queues, worker) = setup(scripted_registry());
        let handle = queues.get_queue(LONG_QUEUE).put(&scripted(JobConfig::new())).await.unwrap();

        let outcome = worker.work_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Finished);

        let unit = h.store.find_unit(handle.job_unit_id).await.unwrap().unwrap();
        assert_eq!(unit.state(), JobUnitState::Succeeded);
        assert!(unit.started_at.is_some());
        let stats = h.store.list_stats(handle.job_unit_id).await.unwrap();
        assert_eq!(stats[0].value, 3.0);

        let task = backend.fetch(&handle.token).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Finished);
    }

    #[tokio::test]
    async fn test_job_error_fails_unit_and_task() {
        let (h, backend, queues, worker) = setup(scripted_registry());
        let handle = queues
            .get_queue(LONG_QUEUE)
            .put(&scripted(JobConfig::new().with("fail", "upstream exploded")))
            .await
            .unwrap();

        let outcome = worker.work_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.error.unwrap().contains("upstream exploded"));

        let unit = h.store.find_unit(handle.job_unit_id).await.unwrap().unwrap();
        assert!(unit.failed);
        assert_eq!(unit.acknowledged, Some(false));
        // Partial stats are still flushed
        assert_eq!(h.store.list_stats(handle.job_unit_id).await.unwrap()[0].value, 3.0);

        let task = backend.fetch(&handle.token).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_runs_failure_hook() {
        let (h, _backend, queues, worker) = setup(scripted_registry());
        let job = scripted(JobConfig::new().with("sleep_ms", 5_000).with("timeout_secs", 1));
        let handle = queues.get_queue(LONG_QUEUE).put(&job).await.unwrap();

        let outcome = worker.work_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.error.unwrap().contains("timed out"));

        let unit = h.store.find_unit(handle.job_unit_id).await.unwrap().unwrap();
        assert_eq!(unit.state(), JobUnitState::Failed);
        assert_eq!(h.store.list_stats(handle.job_unit_id).await.unwrap()[0].value, 3.0);
    }

    #[tokio::test]
    async fn test_missing_unit_fails_task() {
        let (_h, backend, _queues, worker) = setup(scripted_registry());
        let envelope = TaskEnvelope {
            job_class: "seed_sma".into(),
            config: JobConfig::new(),
            definition_id: None,
            timeout_secs: 5,
            on_success: TaskHook::EndJobUnit,
            on_failure: TaskHook::FailJobUnit,
            meta: TaskMeta { job_unit_id: 9_999 },
        };
        let task = backend.enqueue(LONG_QUEUE, &envelope).await.unwrap();

        let outcome = worker.work_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        let error = outcome.error.unwrap();
        assert!(error.contains("job unit 9999"));
        assert!(error.contains(&task.token));
        let task = backend.fetch(&task.token).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);

        // Never committed: the sweep keeps waiting and touches nothing
        assert!(worker.work_once().await.unwrap().is_none());
        assert_eq!(worker.sweep_orphans().await, 0);
    }

    #[tokio::test]
    async fn test_unit_committed_after_task_gave_up_is_failed() {
        let (h, backend, _queues, worker) = setup(scripted_registry());

        // Same order as an enqueue: row staged, task visible, commit still pending
        let mut tx = h.store.begin().await.unwrap();
        let gid = tx.allocate_id("job_unit", "seed_sma").await.unwrap();
        tx.insert_unit(&JobUnitRecord::new(gid.id, "seed_sma", None)).await.unwrap();
        let envelope = TaskEnvelope {
            job_class: "seed_sma".into(),
            config: JobConfig::new(),
            definition_id: None,
            timeout_secs: 5,
            on_success: TaskHook::EndJobUnit,
            on_failure: TaskHook::FailJobUnit,
            meta: TaskMeta { job_unit_id: gid.id },
        };
        let task = backend.enqueue(LONG_QUEUE, &envelope).await.unwrap();
        tx.set_queue_token(gid.id, &task.token).await.unwrap();

        let outcome = worker.work_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(h.store.find_unit(gid.id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert_eq!(h.store.find_unit(gid.id).await.unwrap().unwrap().state(), JobUnitState::Created);

        // Next idle poll reconciles it
        assert!(worker.work_once().await.unwrap().is_none());
        let unit = h.store.find_unit(gid.id).await.unwrap().unwrap();
        assert_eq!(unit.state(), JobUnitState::Failed);
        assert_eq!(unit.acknowledged, Some(false));
        assert_eq!(unit.queue_token.as_deref(), Some(task.token.as_str()));
        let logs = h.store.list_logs(gid.id).await.unwrap();
        assert!(logs.iter().any(|l| l.message.contains(&task.token)));

        // Only once
        assert_eq!(worker.sweep_orphans().await, 0);
    }

    #[tokio::test]
    async fn test_unregistered_class_fails_unit() {
        let (h, _backend, queues, worker) = setup(Arc::new(JobRegistry::new()));
        let handle = queues.get_queue(LONG_QUEUE).put(&scripted(JobConfig::new())).await.unwrap();

        let outcome = worker.work_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        let unit = h.store.find_unit(handle.job_unit_id).await.unwrap().unwrap();
        assert!(unit.failed);
        assert!(unit.started_at.is_none());
    }

    #[tokio::test]
    async fn test_runs_real_seeder() {
        let (h, _backend, queues, worker) = setup(Arc::new(JobRegistry::with_defaults()));
        h.market
            .create_tickers(&[NewTicker::from_listing(&listing("AAPL", "stocks"), Utc::now())])
            .await
            .unwrap();

        let mut job = SeedSmaJob::default();
        job.configure(JobConfig::new().with("ticker", "AAPL"));
        let handle = queues.get_queue(LONG_QUEUE).put(&job).await.unwrap();

        let outcome = worker.work_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Finished);
        let stats = h.store.list_stats(handle.job_unit_id).await.unwrap();
        assert_eq!(stats[0].key, "SMA created");
    }

    #[tokio::test]
    async fn test_empty_queues_and_shutdown() {
        let (_h, _backend, _queues, worker) = setup(scripted_registry());
        assert!(worker.work_once().await.unwrap().is_none());

        let (tx, rx) = watch::channel(false);
        let worker = Arc::new(worker);
        let running = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(rx).await })
        };
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
    }
}

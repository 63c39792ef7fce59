//! In-process handle on one Job Unit.
//!
//! The handle owns the latest known copy of the unit row plus a buffer of stat
//! values. The first `accumulate` for a key writes the stat row; later calls only
//! change the buffered value, which is written by `end_job`/`fail_job` in the same
//! transaction as the unit row. Logs are written as they arrive.
//!
//! Lock order is record, then stats.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::errors::JobError;
use crate::models::{owning_table, JobStat, JobUnitRecord, JobUnitState};
use crate::services::identity_service::IdentityAllocator;
use crate::store::{JobStore, StoreTx};

struct StatEntry {
    stat: JobStat,
    dirty: bool,
}

pub struct JobUnit {
    id: i64,
    store: Arc<dyn JobStore>,
    record: Mutex<JobUnitRecord>,
    stats: Mutex<HashMap<String, StatEntry>>,
}

impl JobUnit {
    /// Allocates an id for a CREATED unit and stages its row in the caller's transaction.
    pub async fn insert_in(
        tx: &mut dyn StoreTx,
        job_class: &str,
        job_def_id: Option<i64>,
    ) -> Result<JobUnitRecord, JobError> {
        let gid = IdentityAllocator::allocate_in(tx, owning_table::JOB_UNIT, job_class).await?;
        let record = JobUnitRecord::new(gid.id, job_class, job_def_id);
        tx.insert_unit(&record).await?;
        Ok(record)
    }

    /// Persists a CREATED unit in its own transaction, with no task behind it.
    #[cfg(test)]
    pub async fn create(
        store: Arc<dyn JobStore>,
        job_class: &str,
        job_def_id: Option<i64>,
    ) -> Result<Self, JobError> {
        let mut tx = store.begin().await?;
        let record = Self::insert_in(tx.as_mut(), job_class, job_def_id).await?;
        tx.commit().await?;
        Ok(Self {
            id: record.id,
            store,
            record: Mutex::new(record),
            stats: Mutex::new(HashMap::new()),
        })
    }

    /// Re-resolves a unit from the store, including stats written so far.
    pub async fn load(store: Arc<dyn JobStore>, id: i64) -> Result<Self, JobError> {
        let record = store
            .find_unit(id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("job unit {}", id)))?;
        let stats = store
            .list_stats(id)
            .await?
            .into_iter()
            .map(|stat| (stat.key.clone(), StatEntry { stat, dirty: false }))
            .collect();

        Ok(Self {
            id,
            store,
            record: Mutex::new(record),
            stats: Mutex::new(stats),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub async fn snapshot(&self) -> JobUnitRecord {
        self.record.lock().await.clone()
    }

    pub async fn state(&self) -> JobUnitState {
        self.record.lock().await.state()
    }

    /// Current in-memory value for a stat key.
    pub async fn stat(&self, key: &str) -> Option<f64> {
        self.stats.lock().await.get(key).map(|e| e.stat.value)
    }

    pub async fn start_job(&self) -> Result<(), JobError> {
        let mut record = self.record.lock().await;
        if record.started_at.is_some() || record.ended_at.is_some() {
            return Err(JobError::InvalidTransition {
                unit_id: self.id,
                action: "start",
                state: record.state(),
            });
        }

        let mut next = record.clone();
        next.started_at = Some(Utc::now());
        self.store.update_unit(&next).await?;
        *record = next;

        info!("Job unit {} ({}) started", self.id, record.job_class);
        Ok(())
    }

    /// Adds `value` to the stat `key` and returns the new total.
    pub async fn accumulate(&self, key: &str, value: f64) -> Result<f64, JobError> {
        let mut stats = self.stats.lock().await;

        if let Some(entry) = stats.get_mut(key) {
            entry.stat.value += value;
            entry.dirty = true;
            return Ok(entry.stat.value);
        }

        let stat = self.store.insert_stat(self.id, key, value).await?;
        let total = stat.value;
        stats.insert(key.to_string(), StatEntry { stat, dirty: false });
        Ok(total)
    }

    pub async fn log(&self, message: impl Into<String>) -> Result<(), JobError> {
        let message = message.into();
        info!("[job unit {}] {}", self.id, message);
        self.store.insert_log(self.id, &message).await?;
        Ok(())
    }

    /// Success hook target.
    pub async fn end_job(&self) -> Result<(), JobError> {
        self.finish(false).await
    }

    /// Failure hook target.
    pub async fn fail_job(&self) -> Result<(), JobError> {
        self.finish(true).await
    }

    async fn finish(&self, failed: bool) -> Result<(), JobError> {
        let action = if failed { "fail" } else { "end" };
        let mut record = self.record.lock().await;
        if record.ended_at.is_some() {
            return Err(JobError::InvalidTransition { unit_id: self.id, action, state: record.state() });
        }

        let mut next = record.clone();
        next.ended_at = Some(Utc::now());
        if failed {
            next.failed = true;
            next.acknowledged = Some(false);
        }

        let mut stats = self.stats.lock().await;
        let dirty: Vec<JobStat> = stats
            .values()
            .filter(|e| e.dirty)
            .map(|e| e.stat.clone())
            .collect();

        // On error the in-memory unit keeps no end timestamp, so the hook can be retried.
        self.store.flush_unit(&next, &dirty).await.map_err(|e| {
            error!("Failed to flush job unit {} on {}: {}", self.id, action, e);
            e
        })?;

        for entry in stats.values_mut() {
            entry.dirty = false;
        }
        *record = next;

        if failed {
            warn!("Job unit {} ({}) failed", self.id, record.job_class);
        } else {
            info!("Job unit {} ({}) finished", self.id, record.job_class);
        }
        Ok(())
    }

    /// Marks a failed unit as seen by an operator.
    pub async fn acknowledge(&self) -> Result<(), JobError> {
        let mut record = self.record.lock().await;
        if !record.failed {
            return Err(JobError::InvalidTransition {
                unit_id: self.id,
                action: "acknowledge",
                state: record.state(),
            });
        }

        let mut next = record.clone();
        next.acknowledged = Some(true);
        self.store.update_unit(&next).await?;
        *record = next;
        Ok(())
    }
}

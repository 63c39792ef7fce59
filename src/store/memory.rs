//! In-memory stores with the same transactional contract as the Postgres ones.
//!
//! Used by tests and by local runs without a database. Ids come from a shared
//! atomic sequence: values drawn inside a rolled-back transaction are skipped,
//! like `nextval` on a Postgres sequence, while ledger rows only land on commit.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

use crate::errors::StoreError;
use crate::models::{
    owning_table, CreateJobDefinition, DailyBar, GlobalId, JobDefinition, JobLog, JobStat, JobUnitRecord,
    NewTicker, SmaPoint, Ticker,
};
use crate::store::{JobStore, MarketStore, StoreTx};

#[derive(Default)]
struct JobState {
    global_ids: BTreeMap<i64, GlobalId>,
    units: BTreeMap<i64, JobUnitRecord>,
    stats: Vec<JobStat>,
    logs: Vec<JobLog>,
    definitions: BTreeMap<i64, JobDefinition>,
}

struct Inner {
    state: Mutex<JobState>,
    id_seq: AtomicI64,
    row_seq: AtomicI64,
    available: AtomicBool,
}

#[derive(Clone)]
pub struct MemoryJobStore {
    inner: Arc<Inner>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(JobState::default()),
                id_seq: AtomicI64::new(1),
                row_seq: AtomicI64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates losing the database: every operation fails until restored.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn global_ids(&self) -> Vec<GlobalId> {
        self.inner.state.lock().global_ids.values().cloned().collect()
    }

    fn check(&self) -> Result<(), StoreError> {
        check_available(&self.inner)
    }

    fn next_row_id(&self) -> i64 {
        self.inner.row_seq.fetch_add(1, Ordering::SeqCst)
    }
}

fn check_available(inner: &Inner) -> Result<(), StoreError> {
    if inner.available.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(StoreError::Unavailable("memory store offline".to_string()))
    }
}

enum StagedOp {
    Ledger(GlobalId),
    Unit(JobUnitRecord),
    Token { unit_id: i64, token: String },
}

pub struct MemoryStoreTx {
    inner: Arc<Inner>,
    staged: Vec<StagedOp>,
}

impl MemoryStoreTx {
    fn unit_staged(&self, unit_id: i64) -> bool {
        self.staged
            .iter()
            .any(|op| matches!(op, StagedOp::Unit(u) if u.id == unit_id))
    }
}

#[async_trait]
impl StoreTx for MemoryStoreTx {
    async fn allocate_id(&mut self, owning_table: &str, owning_class: &str) -> Result<GlobalId, StoreError> {
        check_available(&self.inner)?;
        let gid = GlobalId {
            id: self.inner.id_seq.fetch_add(1, Ordering::SeqCst),
            claimed: true,
            table_name: owning_table.to_string(),
            class_name: owning_class.to_string(),
            created_at: Utc::now(),
        };
        self.staged.push(StagedOp::Ledger(gid.clone()));
        Ok(gid)
    }

    async fn insert_unit(&mut self, unit: &JobUnitRecord) -> Result<(), StoreError> {
        check_available(&self.inner)?;
        if self.unit_staged(unit.id) || self.inner.state.lock().units.contains_key(&unit.id) {
            return Err(StoreError::Conflict(format!("job unit {} already exists", unit.id)));
        }
        self.staged.push(StagedOp::Unit(unit.clone()));
        Ok(())
    }

    async fn set_queue_token(&mut self, unit_id: i64, token: &str) -> Result<(), StoreError> {
        check_available(&self.inner)?;
        if !self.unit_staged(unit_id) && !self.inner.state.lock().units.contains_key(&unit_id) {
            return Err(StoreError::NotFound(format!("job unit {}", unit_id)));
        }
        self.staged.push(StagedOp::Token { unit_id, token: token.to_string() });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryStoreTx { inner, staged } = *self;
        check_available(&inner)?;
        let mut state = inner.state.lock();

        for op in &staged {
            if let StagedOp::Token { unit_id, token } = op {
                let taken = state
                    .units
                    .values()
                    .any(|u| u.id != *unit_id && u.queue_token.as_deref() == Some(token.as_str()));
                if taken {
                    return Err(StoreError::Conflict(format!("queue token {} already assigned", token)));
                }
            }
        }

        for op in staged {
            match op {
                StagedOp::Ledger(gid) => {
                    state.global_ids.insert(gid.id, gid);
                }
                StagedOp::Unit(unit) => {
                    state.units.insert(unit.id, unit);
                }
                StagedOp::Token { unit_id, token } => {
                    if let Some(unit) = state.units.get_mut(&unit_id) {
                        unit.queue_token = Some(token);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        self.check()?;
        Ok(Box::new(MemoryStoreTx { inner: self.inner.clone(), staged: Vec::new() }))
    }

    async fn find_global_id(&self, id: i64) -> Result<Option<GlobalId>, StoreError> {
        self.check()?;
        Ok(self.inner.state.lock().global_ids.get(&id).cloned())
    }

    async fn find_unit(&self, id: i64) -> Result<Option<JobUnitRecord>, StoreError> {
        self.check()?;
        Ok(self.inner.state.lock().units.get(&id).cloned())
    }

    async fn find_unit_by_token(&self, token: &str) -> Result<Option<JobUnitRecord>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .state
            .lock()
            .units
            .values()
            .find(|u| u.queue_token.as_deref() == Some(token))
            .cloned())
    }

    async fn count_units(&self) -> Result<i64, StoreError> {
        self.check()?;
        Ok(self.inner.state.lock().units.len() as i64)
    }

    async fn update_unit(&self, unit: &JobUnitRecord) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.inner.state.lock();
        match state.units.get_mut(&unit.id) {
            Some(existing) => {
                *existing = unit.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("job unit {}", unit.id))),
        }
    }

    async fn insert_stat(&self, unit_id: i64, key: &str, value: f64) -> Result<JobStat, StoreError> {
        self.check()?;
        let mut state = self.inner.state.lock();
        if !state.units.contains_key(&unit_id) {
            return Err(StoreError::NotFound(format!("job unit {}", unit_id)));
        }
        if state.stats.iter().any(|s| s.job_unit_id == unit_id && s.key == key) {
            return Err(StoreError::Conflict(format!("stat '{}' already exists for job unit {}", key, unit_id)));
        }
        let stat = JobStat { id: self.next_row_id(), job_unit_id: unit_id, key: key.to_string(), value };
        state.stats.push(stat.clone());
        Ok(stat)
    }

    async fn insert_log(&self, unit_id: i64, message: &str) -> Result<JobLog, StoreError> {
        self.check()?;
        let mut state = self.inner.state.lock();
        if !state.units.contains_key(&unit_id) {
            return Err(StoreError::NotFound(format!("job unit {}", unit_id)));
        }
        let log = JobLog {
            id: self.next_row_id(),
            job_unit_id: unit_id,
            message: message.to_string(),
            logged_at: Utc::now(),
        };
        state.logs.push(log.clone());
        Ok(log)
    }

    async fn flush_unit(&self, unit: &JobUnitRecord, stats: &[JobStat]) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.inner.state.lock();
        if !state.units.contains_key(&unit.id) {
            return Err(StoreError::NotFound(format!("job unit {}", unit.id)));
        }
        for stat in stats {
            if let Some(existing) = state.stats.iter_mut().find(|s| s.id == stat.id) {
                existing.value = stat.value;
            }
        }
        state.units.insert(unit.id, unit.clone());
        Ok(())
    }

    async fn list_stats(&self, unit_id: i64) -> Result<Vec<JobStat>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .state
            .lock()
            .stats
            .iter()
            .filter(|s| s.job_unit_id == unit_id)
            .cloned()
            .collect())
    }

    async fn list_logs(&self, unit_id: i64) -> Result<Vec<JobLog>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .state
            .lock()
            .logs
            .iter()
            .filter(|l| l.job_unit_id == unit_id)
            .cloned()
            .collect())
    }

    async fn find_definition(&self, id: i64) -> Result<Option<JobDefinition>, StoreError> {
        self.check()?;
        Ok(self.inner.state.lock().definitions.get(&id).cloned())
    }

    async fn find_definition_by_name(&self, display_name: &str) -> Result<Option<JobDefinition>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .state
            .lock()
            .definitions
            .values()
            .find(|d| d.display_name == display_name)
            .cloned())
    }

    async fn list_definitions(&self) -> Result<Vec<JobDefinition>, StoreError> {
        self.check()?;
        let mut definitions: Vec<JobDefinition> =
            self.inner.state.lock().definitions.values().cloned().collect();
        definitions.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(definitions)
    }

    async fn create_definition(&self, new: &CreateJobDefinition) -> Result<JobDefinition, StoreError> {
        if self.find_definition_by_name(&new.display_name).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "job definition '{}' already exists",
                new.display_name
            )));
        }

        let mut tx = self.begin().await?;
        let gid = tx.allocate_id(owning_table::JOB_DEF, "JobDefinition").await?;
        tx.commit().await?;

        let definition = JobDefinition {
            id: gid.id,
            display_name: new.display_name.clone(),
            default_config: sqlx::types::Json(new.default_config.clone()),
            job_class: new.job_class.clone(),
            enabled: new.enabled,
            queue_name: new.queue_name.clone(),
            schedule: new.schedule.clone(),
            created_at: gid.created_at,
        };
        self.inner.state.lock().definitions.insert(definition.id, definition.clone());
        Ok(definition)
    }
}

#[derive(Default)]
struct MarketState {
    tickers: BTreeMap<i64, Ticker>,
    bars: BTreeMap<(i64, NaiveDate), DailyBar>,
    sma: Vec<SmaPoint>,
}

/// Market records; ticker ids are drawn from the job store's identity ledger.
#[derive(Clone)]
pub struct MemoryMarketStore {
    ids: MemoryJobStore,
    state: Arc<Mutex<MarketState>>,
}

impl MemoryMarketStore {
    pub fn new(ids: MemoryJobStore) -> Self {
        Self { ids, state: Arc::new(Mutex::new(MarketState::default())) }
    }

    fn check(&self) -> Result<(), StoreError> {
        check_available(&self.ids.inner)
    }
}

#[async_trait]
impl MarketStore for MemoryMarketStore {
    async fn find_ticker(&self, symbol: &str) -> Result<Option<Ticker>, StoreError> {
        self.check()?;
        Ok(self.state.lock().tickers.values().find(|t| t.ticker == symbol).cloned())
    }

    async fn find_tickers_by_market(&self, market: &str) -> Result<Vec<Ticker>, StoreError> {
        self.check()?;
        let mut tickers: Vec<Ticker> = self
            .state
            .lock()
            .tickers
            .values()
            .filter(|t| t.market == market)
            .cloned()
            .collect();
        tickers.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(tickers)
    }

    async fn create_tickers(&self, tickers: &[NewTicker]) -> Result<u64, StoreError> {
        self.check()?;
        {
            let state = self.state.lock();
            let mut seen = HashSet::new();
            for t in tickers {
                if !seen.insert(t.ticker.as_str()) || state.tickers.values().any(|e| e.ticker == t.ticker) {
                    return Err(StoreError::Conflict(format!("ticker {} already exists", t.ticker)));
                }
            }
        }

        let mut tx = self.ids.begin().await?;
        let mut created = Vec::with_capacity(tickers.len());
        for t in tickers {
            let gid = tx.allocate_id(owning_table::TICKER, "Ticker").await?;
            created.push(Ticker {
                id: gid.id,
                ticker: t.ticker.clone(),
                name: t.name.clone(),
                primary_exchange: t.primary_exchange.clone(),
                market: t.market.clone(),
                ticker_type: t.ticker_type.clone(),
                currency: t.currency.clone(),
                active: t.active,
                last_audit: t.audited_at,
                created_at: gid.created_at,
            });
        }
        tx.commit().await?;

        let mut state = self.state.lock();
        let count = created.len() as u64;
        for ticker in created {
            state.tickers.insert(ticker.id, ticker);
        }
        Ok(count)
    }

    async fn update_tickers(&self, tickers: &[Ticker]) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let mut updated = 0;
        for t in tickers {
            if let Some(existing) = state.tickers.get_mut(&t.id) {
                *existing = t.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn daily_bar_dates(&self, ticker_id: i64) -> Result<HashSet<NaiveDate>, StoreError> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .bars
            .keys()
            .filter(|(id, _)| *id == ticker_id)
            .map(|(_, date)| *date)
            .collect())
    }

    async fn create_daily_bars(&self, bars: &[DailyBar]) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let mut inserted = 0;
        for bar in bars {
            let key = (bar.ticker_id, bar.date);
            if !state.bars.contains_key(&key) {
                state.bars.insert(key, bar.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_sma(&self, ticker_id: i64) -> Result<Vec<SmaPoint>, StoreError> {
        self.check()?;
        let mut points: Vec<SmaPoint> = self
            .state
            .lock()
            .sma
            .iter()
            .filter(|p| p.ticker_id == ticker_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn create_sma(&self, points: &[SmaPoint]) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let mut inserted = 0;
        for point in points {
            if !state.sma.iter().any(|p| p.same_observation(point)) {
                state.sma.push(point.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

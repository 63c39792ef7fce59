use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::{global_id_queries, job_definition_queries, job_unit_queries, market_queries};
use crate::errors::StoreError;
use crate::models::{
    CreateJobDefinition, DailyBar, GlobalId, JobDefinition, JobLog, JobStat, JobUnitRecord, NewTicker,
    SmaPoint, Ticker,
};
use crate::store::{JobStore, MarketStore, StoreTx};

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn allocate_id(&mut self, owning_table: &str, owning_class: &str) -> Result<GlobalId, StoreError> {
        Ok(global_id_queries::allocate(&mut *self.tx, owning_table, owning_class).await?)
    }

    async fn insert_unit(&mut self, unit: &JobUnitRecord) -> Result<(), StoreError> {
        job_unit_queries::insert_unit(&mut *self.tx, unit).await?;
        Ok(())
    }

    async fn set_queue_token(&mut self, unit_id: i64, token: &str) -> Result<(), StoreError> {
        let touched = job_unit_queries::set_queue_token(&mut *self.tx, unit_id, token).await?;
        if touched == 0 {
            return Err(StoreError::NotFound(format!("job unit {}", unit_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn find_global_id(&self, id: i64) -> Result<Option<GlobalId>, StoreError> {
        Ok(global_id_queries::find_by_id(&self.pool, id).await?)
    }

    async fn find_unit(&self, id: i64) -> Result<Option<JobUnitRecord>, StoreError> {
        Ok(job_unit_queries::find_by_id(&self.pool, id).await?)
    }

    async fn find_unit_by_token(&self, token: &str) -> Result<Option<JobUnitRecord>, StoreError> {
        Ok(job_unit_queries::find_by_token(&self.pool, token).await?)
    }

    async fn count_units(&self) -> Result<i64, StoreError> {
        Ok(job_unit_queries::count_units(&self.pool).await?)
    }

    async fn update_unit(&self, unit: &JobUnitRecord) -> Result<(), StoreError> {
        let touched = job_unit_queries::update_unit(&self.pool, unit).await?;
        if touched == 0 {
            return Err(StoreError::NotFound(format!("job unit {}", unit.id)));
        }
        Ok(())
    }

    async fn insert_stat(&self, unit_id: i64, key: &str, value: f64) -> Result<JobStat, StoreError> {
        job_unit_queries::insert_stat(&self.pool, unit_id, key, value)
            .await
            .map_err(unique_to_conflict)
    }

    async fn insert_log(&self, unit_id: i64, message: &str) -> Result<JobLog, StoreError> {
        Ok(job_unit_queries::insert_log(&self.pool, unit_id, message).await?)
    }

    async fn flush_unit(&self, unit: &JobUnitRecord, stats: &[JobStat]) -> Result<(), StoreError> {
        let touched = job_unit_queries::flush_unit(&self.pool, unit, stats).await?;
        if touched == 0 {
            return Err(StoreError::NotFound(format!("job unit {}", unit.id)));
        }
        Ok(())
    }

    async fn list_stats(&self, unit_id: i64) -> Result<Vec<JobStat>, StoreError> {
        Ok(job_unit_queries::list_stats(&self.pool, unit_id).await?)
    }

    async fn list_logs(&self, unit_id: i64) -> Result<Vec<JobLog>, StoreError> {
        Ok(job_unit_queries::list_logs(&self.pool, unit_id).await?)
    }

    async fn find_definition(&self, id: i64) -> Result<Option<JobDefinition>, StoreError> {
        Ok(job_definition_queries::find_by_id(&self.pool, id).await?)
    }

    async fn find_definition_by_name(&self, display_name: &str) -> Result<Option<JobDefinition>, StoreError> {
        Ok(job_definition_queries::find_by_display_name(&self.pool, display_name).await?)
    }

    async fn list_definitions(&self) -> Result<Vec<JobDefinition>, StoreError> {
        Ok(job_definition_queries::find_all(&self.pool).await?)
    }

    async fn create_definition(&self, new: &CreateJobDefinition) -> Result<JobDefinition, StoreError> {
        job_definition_queries::create(&self.pool, new)
            .await
            .map_err(unique_to_conflict)
    }
}

fn unique_to_conflict(e: sqlx::Error) -> StoreError {
    let err = StoreError::Sqlx(e);
    if err.is_unique_violation() {
        StoreError::Conflict(err.to_string())
    } else {
        err
    }
}

#[derive(Clone)]
pub struct PgMarketStore {
    pool: PgPool,
}

impl PgMarketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketStore for PgMarketStore {
    async fn find_ticker(&self, symbol: &str) -> Result<Option<Ticker>, StoreError> {
        Ok(market_queries::find_ticker(&self.pool, symbol).await?)
    }

    async fn find_tickers_by_market(&self, market: &str) -> Result<Vec<Ticker>, StoreError> {
        Ok(market_queries::find_tickers_by_market(&self.pool, market).await?)
    }

    async fn create_tickers(&self, tickers: &[NewTicker]) -> Result<u64, StoreError> {
        market_queries::create_tickers(&self.pool, tickers)
            .await
            .map_err(unique_to_conflict)
    }

    async fn update_tickers(&self, tickers: &[Ticker]) -> Result<u64, StoreError> {
        Ok(market_queries::update_tickers(&self.pool, tickers).await?)
    }

    async fn daily_bar_dates(&self, ticker_id: i64) -> Result<HashSet<NaiveDate>, StoreError> {
        Ok(market_queries::daily_bar_dates(&self.pool, ticker_id).await?)
    }

    async fn create_daily_bars(&self, bars: &[DailyBar]) -> Result<u64, StoreError> {
        Ok(market_queries::insert_daily_bars(&self.pool, bars).await?)
    }

    async fn find_sma(&self, ticker_id: i64) -> Result<Vec<SmaPoint>, StoreError> {
        Ok(market_queries::find_sma(&self.pool, ticker_id).await?)
    }

    async fn create_sma(&self, points: &[SmaPoint]) -> Result<u64, StoreError> {
        Ok(market_queries::insert_sma(&self.pool, points).await?)
    }
}

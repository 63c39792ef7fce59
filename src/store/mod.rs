//! Storage seams for the batch subsystem.
//!
//! `JobStore` owns the identity ledger, job units with their stats and logs,
//! and job definitions. `MarketStore` owns the market-data records the seeders
//! write. Both have a Postgres implementation and an in-memory one.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::StoreError;
use crate::models::{
    CreateJobDefinition, DailyBar, GlobalId, JobDefinition, JobLog, JobStat, JobUnitRecord, NewTicker,
    SmaPoint, Ticker,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryJobStore, MemoryMarketStore};
pub use postgres::{PgJobStore, PgMarketStore};

/// An open unit of work. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait StoreTx: Send {
    /// Issues a new id and records its ledger row inside this transaction.
    async fn allocate_id(&mut self, owning_table: &str, owning_class: &str) -> Result<GlobalId, StoreError>;

    async fn insert_unit(&mut self, unit: &JobUnitRecord) -> Result<(), StoreError>;

    async fn set_queue_token(&mut self, unit_id: i64, token: &str) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Standalone allocation in its own transaction.
    async fn allocate_id(&self, owning_table: &str, owning_class: &str) -> Result<GlobalId, StoreError> {
        let mut tx = self.begin().await?;
        let gid = tx.allocate_id(owning_table, owning_class).await?;
        tx.commit().await?;
        Ok(gid)
    }

    async fn find_global_id(&self, id: i64) -> Result<Option<GlobalId>, StoreError>;

    async fn find_unit(&self, id: i64) -> Result<Option<JobUnitRecord>, StoreError>;

    async fn find_unit_by_token(&self, token: &str) -> Result<Option<JobUnitRecord>, StoreError>;

    async fn count_units(&self) -> Result<i64, StoreError>;

    async fn update_unit(&self, unit: &JobUnitRecord) -> Result<(), StoreError>;

    async fn insert_stat(&self, unit_id: i64, key: &str, value: f64) -> Result<JobStat, StoreError>;

    async fn insert_log(&self, unit_id: i64, message: &str) -> Result<JobLog, StoreError>;

    /// Writes the unit row and the given stat values in one transaction.
    async fn flush_unit(&self, unit: &JobUnitRecord, stats: &[JobStat]) -> Result<(), StoreError>;

    async fn list_stats(&self, unit_id: i64) -> Result<Vec<JobStat>, StoreError>;

    async fn list_logs(&self, unit_id: i64) -> Result<Vec<JobLog>, StoreError>;

    async fn find_definition(&self, id: i64) -> Result<Option<JobDefinition>, StoreError>;

    async fn find_definition_by_name(&self, display_name: &str) -> Result<Option<JobDefinition>, StoreError>;

    async fn list_definitions(&self) -> Result<Vec<JobDefinition>, StoreError>;

    async fn create_definition(&self, new: &CreateJobDefinition) -> Result<JobDefinition, StoreError>;
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn find_ticker(&self, symbol: &str) -> Result<Option<Ticker>, StoreError>;

    async fn find_tickers_by_market(&self, market: &str) -> Result<Vec<Ticker>, StoreError>;

    /// Creates tickers with fresh global ids; returns the number created.
    async fn create_tickers(&self, tickers: &[NewTicker]) -> Result<u64, StoreError>;

    async fn update_tickers(&self, tickers: &[Ticker]) -> Result<u64, StoreError>;

    async fn daily_bar_dates(&self, ticker_id: i64) -> Result<HashSet<NaiveDate>, StoreError>;

    /// Inserts bars, silently skipping (ticker_id, date) pairs that already exist.
    async fn create_daily_bars(&self, bars: &[DailyBar]) -> Result<u64, StoreError>;

    async fn find_sma(&self, ticker_id: i64) -> Result<Vec<SmaPoint>, StoreError>;

    async fn create_sma(&self, points: &[SmaPoint]) -> Result<u64, StoreError>;
}

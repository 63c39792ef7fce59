//! Background Jobs Module
//!
//! Jobs are configured in the request path, enqueued through a
//! [`WorkQueue`](crate::services::queue_service::WorkQueue) and executed later
//! by a worker against a [`JobUnit`] that records timing, stats and logs.
//!
//! # Available Jobs
//!
//! - `seed_tickers_job` - Creates, updates and audits ticker reference data for a market
//! - `seed_daily_agg_job` - Backfills missing daily aggregates with a bounded retry walk
//! - `seed_sma_job` - Stores simple moving average series not already present
//!
//! # Job Contract
//!
//! - `configure` merges overrides with replace semantics
//! - `validate` runs before anything is enqueued
//! - `run` marks the unit started and then executes the job body
//! - Terminal unit states are written by the queue hooks, never by the job body

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::JobError;
use crate::external::market_data_provider::MarketDataProvider;
use crate::services::job_unit_service::JobUnit;
use crate::services::trading_calendar::TradingCalendar;
use crate::store::{JobStore, MarketStore};

pub mod job_config;
pub mod registry;
pub mod seed_daily_agg_job;
pub mod seed_sma_job;
pub mod seed_tickers_job;

#[cfg(test)]
pub(crate) mod test_support;

pub use job_config::JobConfig;
pub use registry::{JobKind, JobRegistry};

// Context passed to job bodies by the worker
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub market: Arc<dyn MarketStore>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub calendar: Arc<TradingCalendar>,
}

/// State every job carries: its config and the definition it came from.
#[derive(Debug, Clone, Default)]
pub struct JobBase {
    pub config: JobConfig,
    pub definition_id: Option<i64>,
}

#[async_trait]
pub trait Job: Send + Sync {
    fn kind(&self) -> JobKind;

    fn base(&self) -> &JobBase;

    fn base_mut(&mut self) -> &mut JobBase;

    fn config(&self) -> &JobConfig {
        &self.base().config
    }

    fn definition_id(&self) -> Option<i64> {
        self.base().definition_id
    }

    fn configure(&mut self, overrides: JobConfig) {
        self.base_mut().config.merge(overrides);
    }

    fn validate(&self) -> Result<(), JobError> {
        Ok(())
    }

    /// Queue entry point.
    async fn run(&self, unit: &JobUnit, ctx: &JobContext) -> Result<(), JobError> {
        unit.start_job().await?;
        self.execute(unit, ctx).await
    }

    async fn execute(&self, unit: &JobUnit, ctx: &JobContext) -> Result<(), JobError>;
}

//! Daily Aggregate Backfill Job
//!
//! Backfills missing daily OHLCV bars for one ticker or a whole market using a
//! bounded-retry walk over the ticker's trading calendar.
//!
//! # Config
//!
//! - `ticker` or `market` (exactly one)
//! - `retries` - miss budget per ticker, reset by every stored or fetched day (default 3)
//! - `end` - oldest date, exclusive (default 1900-01-01)
//! - `start` - newest date, exclusive (default today)
//!
//! # Error Handling
//!
//! - Data gaps and transient provider errors spend the retry budget
//! - An exhausted budget ends that ticker's walk with a log entry, not a failure
//! - Any other per-ticker error is logged and the batch moves on
//! - Rejected provider credentials fail the whole job
//!
//! Bars are written per ticker once its walk completes. Because exhaustion is
//! silent, the job also records how many trading days the window expected and
//! how many are now covered.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{error, info};

use crate::errors::JobError;
use crate::jobs::{Job, JobBase, JobContext, JobKind};
use crate::models::Ticker;
use crate::services::backfill_service::{walk_daily_aggs, BackfillReport, BackfillWindow};
use crate::services::job_unit_service::JobUnit;
use crate::services::trading_calendar::calendar_code;

const DEFAULT_RETRIES: i64 = 3;
const DEFAULT_END: &str = "1900-01-01";

pub const STAT_CREATED: &str = "Daily Agg created";
pub const STAT_MISSES: &str = "Daily Agg misses";
pub const STAT_EXHAUSTED: &str = "Tickers exhausted";
pub const STAT_FAILED: &str = "Tickers failed";
pub const STAT_EXPECTED: &str = "Trading days expected";
pub const STAT_COVERED: &str = "Trading days covered";

#[derive(Debug, Clone, PartialEq)]
enum Scope {
    Ticker(String),
    Market(String),
}

#[derive(Debug, Clone)]
struct Params {
    scope: Scope,
    window: BackfillWindow,
}

#[derive(Debug, Clone, Default)]
pub struct SeedDailyAggJob {
    base: JobBase,
}

impl SeedDailyAggJob {
    fn params(&self) -> Result<Params, JobError> {
        let config = self.config();
        let ticker = config.get_str("ticker")?.filter(|s| !s.is_empty());
        let market = config.get_str("market")?.filter(|s| !s.is_empty());

        let scope = match (ticker, market) {
            (Some(t), None) => Scope::Ticker(t.to_string()),
            (None, Some(m)) => Scope::Market(m.to_string()),
            _ => {
                return Err(JobError::Config(
                    "params 'ticker' and 'market' are mutually exclusive".to_string(),
                ))
            }
        };

        let retries = config.get_i64("retries")?.unwrap_or(DEFAULT_RETRIES);
        let retries = u32::try_from(retries)
            .ok()
            .filter(|r| *r >= 1)
            .ok_or_else(|| JobError::Config(format!("'retries' must be between 1 and {}, got {}", u32::MAX, retries)))?;

        let end = match config.get_date("end")? {
            Some(d) => d,
            None => NaiveDate::parse_from_str(DEFAULT_END, "%Y-%m-%d")
                .map_err(|e| JobError::Config(e.to_string()))?,
        };
        let start = config.get_date("start")?.unwrap_or_else(|| Utc::now().date_naive());
        if end >= start {
            return Err(JobError::Config(format!("'end' ({}) must be before 'start' ({})", end, start)));
        }

        Ok(Params {
            scope,
            window: BackfillWindow { start, end, max_retries: retries },
        })
    }

    async fn tickers(&self, scope: &Scope, ctx: &JobContext) -> Result<Vec<Ticker>, JobError> {
        match scope {
            Scope::Ticker(symbol) => {
                let ticker = ctx
                    .market
                    .find_ticker(symbol)
                    .await?
                    .ok_or_else(|| JobError::NotFound(format!("ticker {}", symbol)))?;
                Ok(vec![ticker])
            }
            Scope::Market(market) => Ok(ctx.market.find_tickers_by_market(market).await?),
        }
    }

    async fn seed_ticker(
        &self,
        ticker: &Ticker,
        window: &BackfillWindow,
        unit: &JobUnit,
        ctx: &JobContext,
    ) -> Result<(BackfillReport, u64), JobError> {
        let existing = ctx.market.daily_bar_dates(ticker.id).await?;
        let report = walk_daily_aggs(ticker, window, &existing, ctx.provider.as_ref(), &ctx.calendar, unit).await?;
        let inserted = ctx.market.create_daily_bars(&report.bars).await?;
        Ok((report, inserted))
    }
}

#[async_trait]
impl Job for SeedDailyAggJob {
    fn kind(&self) -> JobKind {
        JobKind::SeedDailyAgg
    }

    fn base(&self) -> &JobBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut JobBase {
        &mut self.base
    }

    fn validate(&self) -> Result<(), JobError> {
        self.params().map(|_| ())
    }

    async fn execute(&self, unit: &JobUnit, ctx: &JobContext) -> Result<(), JobError> {
        let params = self.params()?;
        let tickers = self.tickers(&params.scope, ctx).await?;
        info!(
            "Backfilling daily aggregates for {} ticker(s) between {} and {}",
            tickers.len(),
            params.window.end,
            params.window.start
        );

        for key in [STAT_CREATED, STAT_MISSES, STAT_EXHAUSTED, STAT_FAILED, STAT_EXPECTED, STAT_COVERED] {
            unit.accumulate(key, 0.0).await?;
        }

        // Expected days depend only on the calendar, so compute once per calendar
        let mut expected_by_calendar: HashMap<String, i64> = HashMap::new();

        for ticker in &tickers {
            let expected = *expected_by_calendar
                .entry(calendar_code(ticker.exchange()))
                .or_insert_with(|| {
                    ctx.calendar
                        .trading_days_between(params.window.end, params.window.start, ticker.exchange())
                });

            match self.seed_ticker(ticker, &params.window, unit, ctx).await {
                Ok((report, inserted)) => {
                    info!(
                        "{}: {} of {} trading days covered, {} bar(s) stored",
                        ticker.ticker,
                        report.covered(),
                        expected,
                        inserted
                    );
                    unit.accumulate(STAT_CREATED, inserted as f64).await?;
                    unit.accumulate(STAT_MISSES, report.misses as f64).await?;
                    unit.accumulate(STAT_EXPECTED, expected as f64).await?;
                    unit.accumulate(STAT_COVERED, report.covered() as f64).await?;
                    if report.exhausted {
                        unit.accumulate(STAT_EXHAUSTED, 1.0).await?;
                    }
                }
                Err(e @ JobError::Provider(_)) => return Err(e),
                Err(e) => {
                    error!("Exception thrown while seeding {}: {}", ticker.ticker, e);
                    unit.log(format!("Exception thrown while seeding {}: {}", ticker.ticker, e)).await?;
                    unit.accumulate(STAT_FAILED, 1.0).await?;
                    unit.accumulate(STAT_EXPECTED, expected as f64).await?;
                }
            }
        }

        unit.log("Job completed").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{date, harness, listing};
    use crate::jobs::JobConfig;
    use crate::models::NewTicker;
    use crate::store::{JobStore, MarketStore};
    use std::sync::Arc;

    fn job(config: JobConfig) -> SeedDailyAggJob {
        let mut job = SeedDailyAggJob::default();
        job.configure(config);
        job
    }

    #[test]
    fn test_ticker_and_market_are_mutually_exclusive() {
        let both = job(JobConfig::new().with("ticker", "AAPL").with("market", "stocks"));
        assert!(matches!(both.validate(), Err(JobError::Config(_))));

        let neither = job(JobConfig::new());
        assert!(matches!(neither.validate(), Err(JobError::Config(_))));

        assert!(job(JobConfig::new().with("ticker", "AAPL")).validate().is_ok());
    }

    #[test]
    fn test_null_override_clears_default() {
        let mut j = job(JobConfig::new().with("ticker", "AAPL").with("market", "stocks"));
        j.configure(JobConfig::new().with("market", serde_json::Value::Null));
        assert!(j.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let params = job(JobConfig::new().with("market", "stocks")).params().unwrap();
        assert_eq!(params.window.max_retries, 3);
        assert_eq!(params.window.end, date(1900, 1, 1));
        assert_eq!(params.window.start, Utc::now().date_naive());
    }

    #[test]
    fn test_bad_window_is_config_error() {
        let j = job(JobConfig::new().with("ticker", "AAPL").with("start", "2020-01-01").with("end", "2021-01-01"));
        assert!(matches!(j.validate(), Err(JobError::Config(_))));

        let j = job(JobConfig::new().with("ticker", "AAPL").with("retries", 0));
        assert!(matches!(j.validate(), Err(JobError::Config(_))));
    }

    #[test]
    fn test_retries_beyond_u32_are_rejected_not_wrapped() {
        // 2^32 would wrap to a zero budget
        for retries in [4_294_967_296_i64, 4_294_967_297, -1] {
            let j = job(JobConfig::new().with("ticker", "AAPL").with("retries", retries));
            assert!(matches!(j.validate(), Err(JobError::Config(_))), "retries {}", retries);
        }

        let params = job(JobConfig::new().with("ticker", "AAPL").with("retries", 4_294_967_295_i64)).params().unwrap();
        assert_eq!(params.window.max_retries, u32::MAX);
    }

    #[tokio::test]
    async fn test_market_backfill_isolates_tickers() {
        let h = harness();
        h.market
            .create_tickers(&[
                NewTicker::from_listing(&listing("AAPL", "stocks"), Utc::now()),
                NewTicker::from_listing(&listing("GONE", "stocks"), Utc::now()),
                NewTicker::from_listing(&listing("FLKY", "stocks"), Utc::now()),
            ])
            .await
            .unwrap();

        // Window Tue 2024-03-05 .. Mon 2024-03-11 covers Mar 6, 7, 8
        for d in [date(2024, 3, 8), date(2024, 3, 7), date(2024, 3, 6)] {
            h.provider.add_bar("AAPL", d, 170.0);
        }
        h.provider.flaky.lock().insert("FLKY".to_string());

        let j = job(JobConfig::new()
            .with("market", "stocks")
            .with("start", "2024-03-11")
            .with("end", "2024-03-05")
            .with("retries", 2));
        let unit = JobUnit::create(Arc::new(h.store.clone()), "seed_daily_agg", None).await.unwrap();
        j.run(&unit, &h.ctx).await.unwrap();
        unit.end_job().await.unwrap();

        let aapl = h.market.find_ticker("AAPL").await.unwrap().unwrap();
        assert_eq!(h.market.daily_bar_dates(aapl.id).await.unwrap().len(), 3);

        assert_eq!(unit.stat(STAT_CREATED).await, Some(3.0));
        assert_eq!(unit.stat(STAT_EXHAUSTED).await, Some(2.0));
        assert_eq!(unit.stat(STAT_FAILED).await, Some(0.0));
        assert_eq!(unit.stat(STAT_EXPECTED).await, Some(9.0));
        assert_eq!(unit.stat(STAT_COVERED).await, Some(3.0));

        let stored = h.store.list_stats(unit.id()).await.unwrap();
        let created = stored.iter().find(|s| s.key == STAT_CREATED).unwrap();
        assert_eq!(created.value, 3.0);

        let logs = h.store.list_logs(unit.id()).await.unwrap();
        assert!(logs.iter().any(|l| l.message.starts_with("Exception thrown while seeding FLKY")));
        assert_eq!(logs.last().unwrap().message, "Job completed");
    }

    #[tokio::test]
    async fn test_existing_bars_are_not_refetched() {
        let h = harness();
        h.market
            .create_tickers(&[NewTicker::from_listing(&listing("AAPL", "stocks"), Utc::now())])
            .await
            .unwrap();
        let aapl = h.market.find_ticker("AAPL").await.unwrap().unwrap();
        h.provider.add_bar("AAPL", date(2024, 3, 8), 170.0);

        let j = job(JobConfig::new().with("ticker", "AAPL").with("start", "2024-03-11").with("end", "2024-03-06"));
        let unit = JobUnit::create(Arc::new(h.store.clone()), "seed_daily_agg", None).await.unwrap();
        j.run(&unit, &h.ctx).await.unwrap();
        let first_requests = h.provider.requests.lock().len();

        let unit = JobUnit::create(Arc::new(h.store.clone()), "seed_daily_agg", None).await.unwrap();
        j.run(&unit, &h.ctx).await.unwrap();

        // Mar 8 is stored now; only Mar 7 is asked for again
        assert_eq!(h.provider.requests.lock().len() - first_requests, 1);
        assert_eq!(h.market.daily_bar_dates(aapl.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_key_fails_job() {
        let h = harness();
        h.market
            .create_tickers(&[NewTicker::from_listing(&listing("AAPL", "stocks"), Utc::now())])
            .await
            .unwrap();
        *h.provider.revoked.lock() = true;

        let j = job(JobConfig::new().with("ticker", "AAPL").with("start", "2024-03-11"));
        let unit = JobUnit::create(Arc::new(h.store.clone()), "seed_daily_agg", None).await.unwrap();
        let err = j.run(&unit, &h.ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Provider(_)));
    }

    #[tokio::test]
    async fn test_unknown_ticker_fails_job() {
        let h = harness();
        let j = job(JobConfig::new().with("ticker", "NOPE").with("start", "2024-03-11"));
        let unit = JobUnit::create(Arc::new(h.store.clone()), "seed_daily_agg", None).await.unwrap();
        assert!(matches!(j.run(&unit, &h.ctx).await, Err(JobError::NotFound(_))));
    }
}

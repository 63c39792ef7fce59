//! Simple Moving Average Seeder
//!
//! Fetches the provider's SMA series for one ticker (or every ticker in a market
//! when `ticker` is `all`) and stores the points that are not already present.
//!
//! # Config
//!
//! - `ticker` - symbol or `all` (default `all`, which requires `market`)
//! - `timespan` (default `day`), `window` (default 50), `series_type` (default `close`)
//! - `limit` - max points per request (default 5000)

use async_trait::async_trait;
use tracing::info;

use crate::errors::JobError;
use crate::external::market_data_provider::SmaParams;
use crate::jobs::{Job, JobBase, JobContext, JobKind};
use crate::models::{SmaPoint, Ticker};
use crate::services::job_unit_service::JobUnit;

const ALL_TICKERS: &str = "all";

#[derive(Debug, Clone, Default)]
pub struct SeedSmaJob {
    base: JobBase,
}

impl SeedSmaJob {
    fn sma_params(&self) -> Result<SmaParams, JobError> {
        let config = self.config();
        let defaults = SmaParams::default();

        let window = config.get_i64("window")?.unwrap_or(i64::from(defaults.window));
        let window = i32::try_from(window)
            .ok()
            .filter(|w| *w >= 1)
            .ok_or_else(|| JobError::Config(format!("'window' must be between 1 and {}, got {}", i32::MAX, window)))?;
        let limit = config.get_i64("limit")?.unwrap_or(i64::from(defaults.limit));
        let limit = u32::try_from(limit)
            .ok()
            .filter(|l| *l >= 1)
            .ok_or_else(|| JobError::Config(format!("'limit' must be between 1 and {}, got {}", u32::MAX, limit)))?;

        Ok(SmaParams {
            timespan: config.get_str("timespan")?.map(str::to_string).unwrap_or(defaults.timespan),
            window,
            series_type: config.get_str("series_type")?.map(str::to_string).unwrap_or(defaults.series_type),
            limit,
        })
    }

    async fn tickers(&self, ctx: &JobContext) -> Result<Vec<Ticker>, JobError> {
        let config = self.config();
        let symbol = config.get_str("ticker")?.unwrap_or(ALL_TICKERS);

        if symbol == ALL_TICKERS {
            let market = config.get_str("market")?.ok_or_else(|| {
                JobError::Config("Market must be provided if seeding SMA for all tickers".to_string())
            })?;
            return Ok(ctx.market.find_tickers_by_market(market).await?);
        }

        let ticker = ctx
            .market
            .find_ticker(symbol)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("ticker {}", symbol)))?;
        Ok(vec![ticker])
    }
}

#[async_trait]
impl Job for SeedSmaJob {
    fn kind(&self) -> JobKind {
        JobKind::SeedSma
    }

    fn base(&self) -> &JobBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut JobBase {
        &mut self.base
    }

    fn validate(&self) -> Result<(), JobError> {
        self.sma_params()?;
        let config = self.config();
        if config.get_str("ticker")?.unwrap_or(ALL_TICKERS) == ALL_TICKERS && config.get_str("market")?.is_none() {
            return Err(JobError::Config(
                "Market must be provided if seeding SMA for all tickers".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, unit: &JobUnit, ctx: &JobContext) -> Result<(), JobError> {
        let params = self.sma_params()?;
        let tickers = self.tickers(ctx).await?;
        info!("Seeding SMA({}, {}) for {} ticker(s)", params.window, params.series_type, tickers.len());

        let mut to_create: Vec<SmaPoint> = Vec::new();
        for ticker in &tickers {
            let existing = ctx.market.find_sma(ticker.id).await?;
            let series = ctx.provider.fetch_sma(&ticker.ticker, &params).await?;

            for point in series {
                let candidate = SmaPoint {
                    ticker_id: ticker.id,
                    value: (point.value * 10_000.0).round() / 10_000.0,
                    series_type: params.series_type.clone(),
                    timespan: params.timespan.clone(),
                    window_size: params.window,
                    date: point.timestamp.date_naive(),
                    timestamp: point.timestamp,
                };
                let known = existing.iter().chain(to_create.iter()).any(|p| p.same_observation(&candidate));
                if !known {
                    to_create.push(candidate);
                }
            }
        }

        let created = ctx.market.create_sma(&to_create).await?;
        unit.accumulate("SMA created", created as f64).await?;
        unit.log("Job completed successfully").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::market_data_provider::ExternalSmaPoint;
    use crate::jobs::test_support::{harness, listing};
    use crate::jobs::JobConfig;
    use crate::models::NewTicker;
    use crate::store::MarketStore;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    fn job(config: JobConfig) -> SeedSmaJob {
        let mut job = SeedSmaJob::default();
        job.configure(config);
        job
    }

    fn point(millis: i64, value: f64) -> ExternalSmaPoint {
        ExternalSmaPoint { timestamp: DateTime::<Utc>::from_timestamp_millis(millis).unwrap(), value }
    }

    #[test]
    fn test_all_requires_market() {
        assert!(matches!(job(JobConfig::new()).validate(), Err(JobError::Config(_))));
        assert!(job(JobConfig::new().with("market", "stocks")).validate().is_ok());
        assert!(job(JobConfig::new().with("ticker", "AAPL")).validate().is_ok());
    }

    #[test]
    fn test_params_defaults_and_overrides() {
        let params = job(JobConfig::new().with("ticker", "AAPL")).sma_params().unwrap();
        assert_eq!(params.timespan, "day");
        assert_eq!(params.window, 50);
        assert_eq!(params.series_type, "close");
        assert_eq!(params.limit, 5000);

        let params = job(JobConfig::new().with("ticker", "AAPL").with("window", "200")).sma_params().unwrap();
        assert_eq!(params.window, 200);
    }

    #[test]
    fn test_out_of_range_window_and_limit_are_config_errors() {
        let cases = [
            ("window", 2_147_483_648_i64),
            ("window", 0),
            ("limit", 4_294_967_296),
            ("limit", -5),
        ];
        for (key, value) in cases {
            let j = job(JobConfig::new().with("ticker", "AAPL").with(key, value));
            assert!(matches!(j.sma_params(), Err(JobError::Config(_))), "{} = {}", key, value);
        }

        let params = job(JobConfig::new().with("ticker", "AAPL").with("window", i64::from(i32::MAX)))
            .sma_params()
            .unwrap();
        assert_eq!(params.window, i32::MAX);
    }

    #[tokio::test]
    async fn test_only_new_points_are_stored() {
        let h = harness();
        h.market
            .create_tickers(&[NewTicker::from_listing(&listing("AAPL", "stocks"), Utc::now())])
            .await
            .unwrap();
        let aapl = h.market.find_ticker("AAPL").await.unwrap().unwrap();

        h.provider
            .sma
            .lock()
            .insert("AAPL".to_string(), vec![point(1_709_856_000_000, 175.123456), point(1_709_769_600_000, 174.5)]);

        let j = job(JobConfig::new().with("ticker", "AAPL"));
        let unit = JobUnit::create(Arc::new(h.store.clone()), "seed_sma", None).await.unwrap();
        j.run(&unit, &h.ctx).await.unwrap();
        assert_eq!(unit.stat("SMA created").await, Some(2.0));

        let stored = h.market.find_sma(aapl.id).await.unwrap();
        assert!(stored.iter().any(|p| p.value == 175.1235));

        // Second run sees one extra point only
        h.provider
            .sma
            .lock()
            .get_mut("AAPL")
            .unwrap()
            .push(point(1_709_683_200_000, 173.0));
        let unit = JobUnit::create(Arc::new(h.store.clone()), "seed_sma", None).await.unwrap();
        j.run(&unit, &h.ctx).await.unwrap();
        assert_eq!(unit.stat("SMA created").await, Some(1.0));
        assert_eq!(h.market.find_sma(aapl.id).await.unwrap().len(), 3);
    }
}

//! Ticker Reference Data Seeder
//!
//! Pulls every listing for a market from the provider and reconciles it with the
//! stored tickers: unknown symbols are created (each with a fresh global id),
//! known symbols whose descriptive fields changed are updated, and every known
//! symbol gets its audit timestamp refreshed.
//!
//! # Config
//!
//! - `market` (required) - provider market code, e.g. `stocks`
//!
//! # Stats
//!
//! - `Tickers created`, `Tickers updated`, `Tickers audited`

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::errors::JobError;
use crate::jobs::{Job, JobBase, JobContext, JobKind};
use crate::models::{NewTicker, Ticker};
use crate::services::job_unit_service::JobUnit;

#[derive(Debug, Clone, Default)]
pub struct SeedTickersJob {
    base: JobBase,
}

impl SeedTickersJob {
    fn market(&self) -> Result<String, JobError> {
        match self.config().get_str("market")? {
            Some(m) if !m.trim().is_empty() => Ok(m.to_string()),
            _ => Err(JobError::Config("Market must be provided".to_string())),
        }
    }
}

#[async_trait]
impl Job for SeedTickersJob {
    fn kind(&self) -> JobKind {
        JobKind::SeedTickers
    }

    fn base(&self) -> &JobBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut JobBase {
        &mut self.base
    }

    fn validate(&self) -> Result<(), JobError> {
        self.market().map(|_| ())
    }

    async fn execute(&self, unit: &JobUnit, ctx: &JobContext) -> Result<(), JobError> {
        let market = self.market()?;
        let audited_at = Utc::now();

        let existing: HashMap<String, Ticker> = ctx
            .market
            .find_tickers_by_market(&market)
            .await?
            .into_iter()
            .map(|t| (t.ticker.clone(), t))
            .collect();
        let listings = ctx.provider.list_tickers(&market).await?;
        info!("Reconciling {} listings against {} stored tickers for '{}'", listings.len(), existing.len(), market);

        let mut seen = HashSet::new();
        let mut to_create = Vec::new();
        let mut to_update = Vec::new();
        let mut changed = 0u32;

        for listing in &listings {
            if !seen.insert(listing.ticker.clone()) {
                continue;
            }
            match existing.get(&listing.ticker) {
                None => to_create.push(NewTicker::from_listing(listing, audited_at)),
                Some(found) => {
                    let mut ticker = found.clone();
                    if !ticker.matches_listing(listing) {
                        ticker.apply_listing(listing);
                        changed += 1;
                    }
                    ticker.last_audit = audited_at;
                    to_update.push(ticker);
                }
            }
        }

        let created = ctx.market.create_tickers(&to_create).await?;
        let audited = ctx.market.update_tickers(&to_update).await?;

        unit.accumulate("Tickers created", created as f64).await?;
        unit.accumulate("Tickers updated", changed as f64).await?;
        unit.accumulate("Tickers audited", audited as f64).await?;
        unit.log("Job completed successfully").await?;
        Ok(())
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::external::market_data_provider::{
    ExternalDailyBar, ExternalSmaPoint, ExternalTicker, MarketDataProvider, ProviderError, SmaParams,
};
use crate::jobs::JobContext;
use crate::services::trading_calendar::TradingCalendar;
use crate::store::{MemoryJobStore, MemoryMarketStore};

/// Canned provider answers for job tests.
#[derive(Default)]
pub struct FakeProvider {
    pub listings: Mutex<Vec<ExternalTicker>>,
    pub bars: Mutex<HashMap<(String, NaiveDate), ExternalDailyBar>>,
    pub sma: Mutex<HashMap<String, Vec<ExternalSmaPoint>>>,
    /// Tickers whose daily-bar requests fail with a network error.
    pub flaky: Mutex<HashSet<String>>,
    pub revoked: Mutex<bool>,
    pub requests: Mutex<Vec<(String, NaiveDate)>>,
}

impl FakeProvider {
    pub fn add_bar(&self, ticker: &str, date: NaiveDate, close: f64) {
        self.bars.lock().insert(
            (ticker.to_string(), date),
            ExternalDailyBar { date, open: close, high: close, low: close, close, volume: 1000.0 },
        );
    }
}

#[async_trait]
impl MarketDataProvider for FakeProvider {
    async fn list_tickers(&self, market: &str) -> Result<Vec<ExternalTicker>, ProviderError> {
        Ok(self.listings.lock().iter().filter(|t| t.market == market).cloned().collect())
    }

    async fn fetch_daily_bar(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<ExternalDailyBar>, ProviderError> {
        self.requests.lock().push((ticker.to_string(), date));
        if *self.revoked.lock() {
            return Err(ProviderError::Unauthorized("key revoked".into()));
        }
        if self.flaky.lock().contains(ticker) {
            return Err(ProviderError::Network("connection reset".into()));
        }
        Ok(self.bars.lock().get(&(ticker.to_string(), date)).cloned())
    }

    async fn fetch_sma(&self, ticker: &str, _params: &SmaParams) -> Result<Vec<ExternalSmaPoint>, ProviderError> {
        Ok(self.sma.lock().get(ticker).cloned().unwrap_or_default())
    }
}

pub fn listing(symbol: &str, market: &str) -> ExternalTicker {
    ExternalTicker {
        ticker: symbol.to_string(),
        name: format!("{} Inc.", symbol),
        primary_exchange: Some("XNAS".to_string()),
        market: market.to_string(),
        ticker_type: Some("CS".to_string()),
        currency: "usd".to_string(),
        active: true,
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub struct Harness {
    pub store: MemoryJobStore,
    pub market: MemoryMarketStore,
    pub provider: Arc<FakeProvider>,
    pub ctx: JobContext,
}

pub fn harness() -> Harness {
    let store = MemoryJobStore::new();
    let market = MemoryMarketStore::new(store.clone());
    let provider = Arc::new(FakeProvider::default());
    let ctx = JobContext {
        store: Arc::new(store.clone()),
        market: Arc::new(market.clone()),
        provider: provider.clone(),
        calendar: Arc::new(TradingCalendar::new()),
    };
    Harness { store, market, provider, ctx }
}

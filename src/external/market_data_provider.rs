use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A ticker listing as reported by the upstream reference-data endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExternalTicker {
    pub ticker: String,
    pub name: String,
    pub primary_exchange: Option<String>,
    pub market: String,
    pub ticker_type: Option<String>,
    pub currency: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalDailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSmaPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct SmaParams {
    pub timespan: String,
    pub window: i32,
    pub series_type: String,
    pub limit: u32,
}

impl Default for SmaParams {
    fn default() -> Self {
        Self {
            timespan: "day".to_string(),
            window: 50,
            series_type: "close".to_string(),
            limit: 5000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ProviderError {
    /// Transient errors are worth retrying on a later date or a later run.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::Unauthorized(_))
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn list_tickers(&self, market: &str) -> Result<Vec<ExternalTicker>, ProviderError>;

    /// Returns `Ok(None)` when the provider has no bar for that date.
    async fn fetch_daily_bar(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<ExternalDailyBar>, ProviderError>;

    async fn fetch_sma(
        &self,
        ticker: &str,
        params: &SmaParams,
    ) -> Result<Vec<ExternalSmaPoint>, ProviderError>;
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::external::market_data_provider::ExternalTicker;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Ticker {
    pub id: i64,
    pub ticker: String,
    pub name: String,
    pub primary_exchange: Option<String>,
    pub market: String,
    pub ticker_type: Option<String>,
    pub currency: String,
    pub active: bool,
    pub last_audit: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Ticker {
    /// Exchange code used for trading-calendar lookups; US listings default to XNYS.
    pub fn exchange(&self) -> &str {
        self.primary_exchange.as_deref().unwrap_or("XNYS")
    }

    /// True when every descriptive field equals the provider listing.
    pub fn matches_listing(&self, listing: &ExternalTicker) -> bool {
        self.ticker == listing.ticker
            && self.name == listing.name
            && self.primary_exchange == listing.primary_exchange
            && self.market == listing.market
            && self.ticker_type == listing.ticker_type
            && self.currency == listing.currency
            && self.active == listing.active
    }

    pub fn apply_listing(&mut self, listing: &ExternalTicker) {
        self.ticker = listing.ticker.clone();
        self.name = listing.name.clone();
        self.primary_exchange = listing.primary_exchange.clone();
        self.market = listing.market.clone();
        self.ticker_type = listing.ticker_type.clone();
        self.currency = listing.currency.clone();
        self.active = listing.active;
    }
}

#[derive(Debug, Clone)]
pub struct NewTicker {
    pub ticker: String,
    pub name: String,
    pub primary_exchange: Option<String>,
    pub market: String,
    pub ticker_type: Option<String>,
    pub currency: String,
    pub active: bool,
    pub audited_at: DateTime<Utc>,
}

impl NewTicker {
    pub fn from_listing(listing: &ExternalTicker, audited_at: DateTime<Utc>) -> Self {
        Self {
            ticker: listing.ticker.clone(),
            name: listing.name.clone(),
            primary_exchange: listing.primary_exchange.clone(),
            market: listing.market.clone(),
            ticker_type: listing.ticker_type.clone(),
            currency: listing.currency.clone(),
            active: listing.active,
            audited_at,
        }
    }
}

// One daily OHLCV aggregate; unique per (ticker_id, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DailyBar {
    pub ticker_id: i64,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SmaPoint {
    pub ticker_id: i64,
    pub value: f64,
    pub series_type: String,
    pub timespan: String,
    pub window_size: i32,
    pub date: NaiveDate,
    pub timestamp: DateTime<Utc>,
}

impl SmaPoint {
    /// Two points describe the same observation when everything but the value matches.
    pub fn same_observation(&self, other: &SmaPoint) -> bool {
        self.ticker_id == other.ticker_id
            && self.series_type == other.series_type
            && self.timespan == other.timespan
            && self.window_size == other.window_size
            && self.timestamp == other.timestamp
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::external::market_data_provider::{
    ExternalDailyBar, ExternalSmaPoint, ExternalTicker, MarketDataProvider, ProviderError, SmaParams,
};
use crate::services::rate_limiter::RateLimiter;

const BASE_URL: &str = "https://api.polygon.io";
const TICKER_PAGE_LIMIT: &str = "1000";

pub struct PolygonProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl PolygonProvider {
    pub fn new(api_key: String, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
            limiter,
        }
    }

    pub fn from_env(limiter: Arc<RateLimiter>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("POLYGON_API_KEY")
            .map_err(|_| ProviderError::Unauthorized("POLYGON_API_KEY not set".into()))?;
        Ok(Self::new(api_key, limiter))
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, ProviderError> {
        let _guard = self.limiter.acquire().await;
        debug!("GET {}", url);

        let resp = self
            .client
            .get(url)
            .query(query)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ProviderError::Unauthorized(format!("{} rejected the API key", url)))
            }
            _ => Ok(resp),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolygonTickersResponse {
    #[serde(default)]
    results: Vec<PolygonTicker>,
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolygonTicker {
    ticker: String,
    #[serde(default)]
    name: String,
    market: String,
    primary_exchange: Option<String>,
    #[serde(rename = "type")]
    ticker_type: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    currency_name: String,
}

#[derive(Debug, Deserialize)]
struct PolygonOpenClose {
    status: String,
    from: Option<String>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PolygonIndicatorResponse {
    results: Option<PolygonIndicatorResults>,
}

#[derive(Debug, Deserialize)]
struct PolygonIndicatorResults {
    #[serde(default)]
    values: Vec<PolygonIndicatorValue>,
}

#[derive(Debug, Deserialize)]
struct PolygonIndicatorValue {
    timestamp: i64,
    value: f64,
}

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    async fn list_tickers(&self, market: &str) -> Result<Vec<ExternalTicker>, ProviderError> {
        let mut tickers = Vec::new();
        let mut next = Some(format!("{}/v3/reference/tickers", self.base_url));
        let mut first_page = true;

        while let Some(url) = next.take() {
            let query: Vec<(&str, &str)> = if first_page {
                vec![("market", market), ("active", "true"), ("limit", TICKER_PAGE_LIMIT)]
            } else {
                // next_url already carries the cursor and filters
                Vec::new()
            };
            first_page = false;

            let body: PolygonTickersResponse = self
                .get(&url, &query)
                .await?
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            tickers.extend(body.results.into_iter().map(|t| ExternalTicker {
                ticker: t.ticker,
                name: t.name,
                primary_exchange: t.primary_exchange,
                market: t.market,
                ticker_type: t.ticker_type,
                currency: t.currency_name,
                active: t.active,
            }));
            next = body.next_url;
        }

        Ok(tickers)
    }

    async fn fetch_daily_bar(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<ExternalDailyBar>, ProviderError> {
        let url = format!(
            "{}/v1/open-close/{}/{}",
            self.base_url,
            ticker,
            date.format("%Y-%m-%d")
        );
        let resp = self.get(&url, &[("adjusted", "true")]).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ProviderError::BadResponse(format!("status {}", resp.status())));
        }

        let body: PolygonOpenClose = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if body.status != "OK" {
            return Ok(None);
        }

        let bar_date = match body.from.as_deref() {
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| ProviderError::Parse(e.to_string()))?,
            None => date,
        };

        match (body.open, body.high, body.low, body.close) {
            (Some(open), Some(high), Some(low), Some(close)) => Ok(Some(ExternalDailyBar {
                date: bar_date,
                open,
                high,
                low,
                close,
                volume: body.volume.unwrap_or(0.0),
            })),
            _ => Err(ProviderError::BadResponse(format!(
                "incomplete open-close payload for {} on {}",
                ticker, date
            ))),
        }
    }

    async fn fetch_sma(
        &self,
        ticker: &str,
        params: &SmaParams,
    ) -> Result<Vec<ExternalSmaPoint>, ProviderError> {
        let url = format!("{}/v1/indicators/sma/{}", self.base_url, ticker);
        let window = params.window.to_string();
        let limit = params.limit.to_string();

        let resp = self
            .get(
                &url,
                &[
                    ("timespan", params.timespan.as_str()),
                    ("window", window.as_str()),
                    ("series_type", params.series_type.as_str()),
                    ("limit", limit.as_str()),
                ],
            )
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let body: PolygonIndicatorResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        body.results
            .map(|r| r.values)
            .unwrap_or_default()
            .into_iter()
            .map(|v| {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(v.timestamp)
                    .ok_or_else(|| ProviderError::Parse(format!("bad timestamp {}", v.timestamp)))?;
                Ok(ExternalSmaPoint { timestamp, value: v.value })
            })
            .collect()
    }
}

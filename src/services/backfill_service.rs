use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::errors::JobError;
use crate::external::market_data_provider::{ExternalDailyBar, MarketDataProvider};
use crate::models::{DailyBar, Ticker};
use crate::services::job_unit_service::JobUnit;
use crate::services::trading_calendar::TradingCalendar;

/// Backward walk bounds: from the trading day before `start` down to (not including) `end`.
#[derive(Debug, Clone, Copy)]
pub struct BackfillWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    pub visited: u32,
    pub existing: u32,
    pub bars: Vec<DailyBar>,
    pub misses: u32,
    pub errors: u32,
    pub exhausted: bool,
    pub last_date: Option<NaiveDate>,
}

impl BackfillReport {
    /// Days in the window that are now stored or about to be.
    pub fn covered(&self) -> u32 {
        self.existing + self.bars.len() as u32
    }
}

/// Walks one ticker's window backward a trading day at a time.
///
/// The retry budget resets on every stored or fetched day and drops on each
/// miss or transient provider error. Running out of budget ends the walk with
/// `exhausted` set and a log entry on the unit; it is not an error. Provider
/// errors that are not transient (bad credentials) abort the walk.
pub async fn walk_daily_aggs(
    ticker: &Ticker,
    window: &BackfillWindow,
    existing: &HashSet<NaiveDate>,
    provider: &dyn MarketDataProvider,
    calendar: &TradingCalendar,
    unit: &JobUnit,
) -> Result<BackfillReport, JobError> {
    let exchange = ticker.exchange();
    let mut report = BackfillReport::default();
    let mut date = calendar.prev_trading_day(window.start, exchange);
    let mut retries = window.max_retries;

    while retries > 0 && date > window.end {
        report.visited += 1;
        report.last_date = Some(date);

        if existing.contains(&date) {
            report.existing += 1;
            retries = window.max_retries;
        } else {
            match provider.fetch_daily_bar(&ticker.ticker, date).await {
                Ok(Some(bar)) => {
                    report.bars.push(to_daily_bar(ticker.id, date, &bar));
                    retries = window.max_retries;
                }
                Ok(None) => {
                    debug!("No daily aggregate for {} on {}", ticker.ticker, date);
                    report.misses += 1;
                    retries -= 1;
                }
                Err(e) if e.is_transient() => {
                    warn!("Error fetching daily aggregate for {} on {}: {}", ticker.ticker, date, e);
                    unit.log(format!("Exception thrown while seeding {} | {}: {}", ticker.ticker, date, e))
                        .await?;
                    report.errors += 1;
                    retries -= 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        date = calendar.prev_trading_day(date, exchange);
    }

    if window.max_retries > 0 && retries == 0 {
        report.exhausted = true;
        unit.log(format!(
            "Retry budget exhausted for {} at {}; {} day(s) fetched, remaining window skipped",
            ticker.ticker,
            report.last_date.map(|d| d.to_string()).unwrap_or_default(),
            report.bars.len()
        ))
        .await?;
    }

    Ok(report)
}

fn to_daily_bar(ticker_id: i64, requested: NaiveDate, bar: &ExternalDailyBar) -> DailyBar {
    DailyBar {
        ticker_id,
        date: bar.date,
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume.round() as i64,
        timestamp: Utc.from_utc_datetime(&requested.and_time(NaiveTime::MIN)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::market_data_provider::{ExternalSmaPoint, ExternalTicker, ProviderError, SmaParams};
    use crate::store::{JobStore, MemoryJobStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays scripted answers in call order and records requested dates.
    struct ScriptedProvider {
        answers: Mutex<VecDeque<Result<Option<ExternalDailyBar>, ProviderError>>>,
        requested: Mutex<Vec<NaiveDate>>,
    }

    impl ScriptedProvider {
        fn new(answers: Vec<Result<Option<ExternalDailyBar>, ProviderError>>) -> Self {
            Self { answers: Mutex::new(answers.into()), requested: Mutex::new(Vec::new()) }
        }

        fn requested(&self) -> Vec<NaiveDate> {
            self.requested.lock().clone()
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        async fn list_tickers(&self, _market: &str) -> Result<Vec<ExternalTicker>, ProviderError> {
            Ok(Vec::new())
        }

        async fn fetch_daily_bar(
            &self,
            _ticker: &str,
            date: NaiveDate,
        ) -> Result<Option<ExternalDailyBar>, ProviderError> {
            self.requested.lock().push(date);
            match self.answers.lock().pop_front() {
                Some(Ok(Some(mut bar))) => {
                    bar.date = date;
                    Ok(Some(bar))
                }
                Some(other) => other,
                None => Ok(None),
            }
        }

        async fn fetch_sma(&self, _ticker: &str, _params: &SmaParams) -> Result<Vec<ExternalSmaPoint>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hit() -> Result<Option<ExternalDailyBar>, ProviderError> {
        Ok(Some(ExternalDailyBar {
            date: date(2000, 1, 1),
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.5,
            volume: 1200.0,
        }))
    }

    fn miss() -> Result<Option<ExternalDailyBar>, ProviderError> {
        Ok(None)
    }

    fn ticker() -> Ticker {
        Ticker {
            id: 42,
            ticker: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            primary_exchange: Some("XNAS".to_string()),
            market: "stocks".to_string(),
            ticker_type: Some("CS".to_string()),
            currency: "usd".to_string(),
            active: true,
            last_audit: Utc::now(),
            created_at: Utc::now(),
        }
    }

    async fn unit(store: &MemoryJobStore) -> JobUnit {
        JobUnit::create(Arc::new(store.clone()), "seed_daily_agg", None).await.unwrap()
    }

    fn window(max_retries: u32) -> BackfillWindow {
        // Walk starts at Fri 2024-03-08 and steps back over trading days
        BackfillWindow { start: date(2024, 3, 11), end: date(2023, 1, 1), max_retries }
    }

    #[tokio::test]
    async fn test_walk_halts_after_budget_of_misses() {
        let store = MemoryJobStore::new();
        let unit = unit(&store).await;
        let provider = ScriptedProvider::new(vec![miss(), miss(), miss(), hit()]);
        let calendar = TradingCalendar::new();

        let report = walk_daily_aggs(&ticker(), &window(3), &HashSet::new(), &provider, &calendar, &unit)
            .await
            .unwrap();

        assert!(report.exhausted);
        assert_eq!(report.misses, 3);
        assert!(report.bars.is_empty());
        // The fourth day is never attempted
        assert_eq!(provider.requested(), vec![date(2024, 3, 8), date(2024, 3, 7), date(2024, 3, 6)]);

        let logs = store.list_logs(unit.id()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].message.contains("exhausted"));
    }

    #[tokio::test]
    async fn test_hit_resets_budget() {
        let store = MemoryJobStore::new();
        let unit = unit(&store).await;
        // Two misses then a hit, twice over, then the budget runs out
        let provider = ScriptedProvider::new(vec![miss(), miss(), hit(), miss(), miss(), hit()]);
        let calendar = TradingCalendar::new();

        let report = walk_daily_aggs(&ticker(), &window(3), &HashSet::new(), &provider, &calendar, &unit)
            .await
            .unwrap();

        assert_eq!(report.bars.len(), 2);
        assert_eq!(report.misses, 4 + 3);
        assert_eq!(provider.requested().len(), 6 + 3);
        assert!(report.exhausted);
    }

    #[tokio::test]
    async fn test_existing_days_reset_budget_without_fetch() {
        let store = MemoryJobStore::new();
        let unit = unit(&store).await;
        let provider = ScriptedProvider::new(vec![miss(), miss(), miss(), miss(), miss()]);
        let calendar = TradingCalendar::new();

        // Mar 6 is already stored; the two misses before it are forgiven
        let existing: HashSet<NaiveDate> = [date(2024, 3, 6)].into_iter().collect();
        let report = walk_daily_aggs(&ticker(), &window(3), &existing, &provider, &calendar, &unit)
            .await
            .unwrap();

        assert_eq!(report.existing, 1);
        assert!(!provider.requested().contains(&date(2024, 3, 6)));
        assert_eq!(provider.requested().len(), 2 + 3);
    }

    #[tokio::test]
    async fn test_walk_stops_at_window_end() {
        let store = MemoryJobStore::new();
        let unit = unit(&store).await;
        let provider = ScriptedProvider::new(vec![hit(), hit(), hit(), hit(), hit(), hit()]);
        let calendar = TradingCalendar::new();

        let window = BackfillWindow { start: date(2024, 3, 11), end: date(2024, 3, 5), max_retries: 3 };
        let report = walk_daily_aggs(&ticker(), &window, &HashSet::new(), &provider, &calendar, &unit)
            .await
            .unwrap();

        // Mar 8, 7, 6 are strictly after the end date
        assert_eq!(report.bars.len(), 3);
        assert!(!report.exhausted);
        assert_eq!(report.last_date, Some(date(2024, 3, 6)));
        assert_eq!(report.bars[0].ticker_id, 42);
        assert_eq!(report.bars[0].volume, 1200);
    }

    #[tokio::test]
    async fn test_transient_error_is_logged_and_counts_as_miss() {
        let store = MemoryJobStore::new();
        let unit = unit(&store).await;
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Network("connection reset".into())),
            hit(),
        ]);
        let calendar = TradingCalendar::new();

        let window = BackfillWindow { start: date(2024, 3, 11), end: date(2024, 3, 6), max_retries: 2 };
        let report = walk_daily_aggs(&ticker(), &window, &HashSet::new(), &provider, &calendar, &unit)
            .await
            .unwrap();

        assert_eq!(report.errors, 1);
        assert_eq!(report.bars.len(), 1);
        let logs = store.list_logs(unit.id()).await.unwrap();
        assert!(logs[0].message.starts_with("Exception thrown while seeding AAPL | 2024-03-08"));
    }

    #[tokio::test]
    async fn test_unauthorized_escalates() {
        let store = MemoryJobStore::new();
        let unit = unit(&store).await;
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Unauthorized("bad key".into()))]);
        let calendar = TradingCalendar::new();

        let err = walk_daily_aggs(&ticker(), &window(3), &HashSet::new(), &provider, &calendar, &unit)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Provider(ProviderError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_walk_skips_holidays() {
        let store = MemoryJobStore::new();
        let unit = unit(&store).await;
        let provider = ScriptedProvider::new(vec![hit(), hit()]);
        let calendar = TradingCalendar::new();

        let window = BackfillWindow { start: date(2024, 1, 3), end: date(2023, 12, 28), max_retries: 3 };
        walk_daily_aggs(&ticker(), &window, &HashSet::new(), &provider, &calendar, &unit)
            .await
            .unwrap();

        assert_eq!(provider.requested(), vec![date(2024, 1, 2), date(2023, 12, 29)]);
    }
}

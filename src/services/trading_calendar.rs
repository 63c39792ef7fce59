use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use dashmap::DashMap;
use tracing::debug;

/// US venues that follow the NYSE holiday schedule.
const US_EXCHANGES: &[&str] = &[
    "XNYS", "XNAS", "XASE", "ARCX", "BATS", "BATY", "EDGX", "EDGA", "IEXG", "XBOS", "XPHL", "XCHI",
    "NYSE", "NASDAQ", "AMEX", "ARCA",
];

/// One-off NYSE closures that no rule produces.
const XNYS_SPECIAL_CLOSURES: &[(i32, u32, u32)] = &[
    (2012, 10, 29), // Hurricane Sandy
    (2012, 10, 30),
    (2018, 12, 5),  // National day of mourning
    (2025, 1, 9),   // National day of mourning
];

/// Exchange-aware trading calendar.
///
/// Rule-based holidays are computed once per (calendar, year) and cached;
/// holidays supplied at startup are layered on top.
///
/// The NYSE rules are the Monday-holiday schedule in force since 1971, with
/// Martin Luther King Jr. Day from 1998 and Juneteenth from 2022. Earlier years
/// get the same rules, and Saturday sessions (held until 1952) are not modelled,
/// so counts before 1971 are approximate.
pub struct TradingCalendar {
    configured: HashMap<String, HashSet<NaiveDate>>,
    cache: DashMap<(String, i32), Arc<HashSet<NaiveDate>>>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingCalendar {
    pub fn new() -> Self {
        Self { configured: HashMap::new(), cache: DashMap::new() }
    }

    /// Builds a calendar with extra holidays keyed by exchange code.
    pub fn with_holidays(holidays: HashMap<String, Vec<NaiveDate>>) -> Self {
        let mut calendar = Self::new();
        for (exchange, dates) in holidays {
            for date in dates {
                calendar.add_holiday(&exchange, date);
            }
        }
        calendar
    }

    pub fn add_holiday(&mut self, exchange: &str, date: NaiveDate) {
        let code = calendar_code(exchange);
        self.cache.remove(&(code.clone(), date.year()));
        self.configured.entry(code).or_default().insert(date);
    }

    pub fn is_holiday(&self, date: NaiveDate, exchange: &str) -> bool {
        self.holidays_for(&calendar_code(exchange), date.year()).contains(&date)
    }

    pub fn is_trading_day(&self, date: NaiveDate, exchange: &str) -> bool {
        !is_weekend(date) && !self.is_holiday(date, exchange)
    }

    /// Closest trading day strictly before `date`.
    pub fn prev_trading_day(&self, date: NaiveDate, exchange: &str) -> NaiveDate {
        let mut current = date;
        loop {
            current = match current.pred_opt() {
                Some(d) => d,
                None => return current,
            };
            if self.is_trading_day(current, exchange) {
                return current;
            }
        }
    }

    /// Closest trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate, exchange: &str) -> NaiveDate {
        let mut current = date;
        loop {
            current = match current.succ_opt() {
                Some(d) => d,
                None => return current,
            };
            if self.is_trading_day(current, exchange) {
                return current;
            }
        }
    }

    /// Number of trading days strictly between `end` and `start`.
    pub fn trading_days_between(&self, end: NaiveDate, start: NaiveDate, exchange: &str) -> i64 {
        let (first, last) = match (end.succ_opt(), start.pred_opt()) {
            (Some(first), Some(last)) if first <= last => (first, last),
            _ => return 0,
        };

        let code = calendar_code(exchange);
        let closed: i64 = (first.year()..=last.year())
            .map(|year| {
                self.holidays_for(&code, year)
                    .iter()
                    .filter(|d| **d >= first && **d <= last && !is_weekend(**d))
                    .count() as i64
            })
            .sum();

        count_weekdays(first, last) - closed
    }

    fn holidays_for(&self, code: &str, year: i32) -> Arc<HashSet<NaiveDate>> {
        let key = (code.to_string(), year);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let mut holidays = if code == "XNYS" { xnys_holidays(year) } else { HashSet::new() };
        if let Some(extra) = self.configured.get(code) {
            holidays.extend(extra.iter().filter(|d| d.year() == year).copied());
        }
        debug!("Computed {} holidays for {} in {}", holidays.len(), code, year);

        let holidays = Arc::new(holidays);
        self.cache.entry(key).or_insert_with(|| holidays.clone()).clone()
    }
}

/// Maps a venue code to the calendar it trades on.
pub fn calendar_code(exchange: &str) -> String {
    let upper = exchange.trim().to_ascii_uppercase();
    if US_EXCHANGES.contains(&upper.as_str()) {
        "XNYS".to_string()
    } else {
        upper
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

// Inclusive on both ends.
fn count_weekdays(first: NaiveDate, last: NaiveDate) -> i64 {
    let days = (last - first).num_days() + 1;
    let full_weeks = days / 7;
    let mut count = full_weeks * 5;
    let mut current = first + Duration::days(full_weeks * 7);
    while current <= last {
        if !is_weekend(current) {
            count += 1;
        }
        current += Duration::days(1);
    }
    count
}

fn xnys_holidays(year: i32) -> HashSet<NaiveDate> {
    let mut days = HashSet::new();

    // New Year's Day falling on Saturday is not observed on the prior Friday
    if let Some(new_year) = NaiveDate::from_ymd_opt(year, 1, 1) {
        match new_year.weekday() {
            Weekday::Sat => {}
            Weekday::Sun => {
                days.insert(new_year + Duration::days(1));
            }
            _ => {
                days.insert(new_year);
            }
        }
    }

    if year >= 1998 {
        days.extend(nth_weekday(year, 1, Weekday::Mon, 3));
    }
    days.extend(nth_weekday(year, 2, Weekday::Mon, 3));
    days.extend(easter_sunday(year).map(|easter| easter - Duration::days(2)));
    days.extend(last_weekday(year, 5, Weekday::Mon));
    if year >= 2022 {
        days.extend(NaiveDate::from_ymd_opt(year, 6, 19).map(observed));
    }
    days.extend(NaiveDate::from_ymd_opt(year, 7, 4).map(observed));
    days.extend(nth_weekday(year, 9, Weekday::Mon, 1));
    days.extend(nth_weekday(year, 11, Weekday::Thu, 4));
    days.extend(NaiveDate::from_ymd_opt(year, 12, 25).map(observed));

    days.extend(
        XNYS_SPECIAL_CLOSURES
            .iter()
            .filter(|(y, _, _)| *y == year)
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
    );

    days
}

// Saturday holidays move to Friday, Sunday holidays to Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut date = first_of_next.pred_opt()?;
    while date.weekday() != weekday {
        date = date.pred_opt()?;
    }
    Some(date)
}

// Anonymous Gregorian computus
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

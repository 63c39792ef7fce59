use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

use crate::services::queue_service::{DEFAULT_QUEUE, LONG_QUEUE, SHORT_QUEUE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Which half of the system this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRole {
    Api,
    Worker,
}

impl FromStr for AppRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" => Ok(AppRole::Api),
            "worker" => Ok(AppRole::Worker),
            _ => Err(ConfigError::Invalid { key: "APP_ROLE", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: String,
    pub role: AppRole,
    pub bind_addr: SocketAddr,
    pub worker_queues: Vec<String>,
    pub worker_poll_ms: u64,
    pub worker_concurrency: usize,
    pub queue_default_timeout_secs: u64,
    pub polygon_api_key: Option<String>,
    pub polygon_requests_per_minute: u32,
    /// Extra closures per calendar code, on top of the built-in exchange rules.
    pub market_holidays: HashMap<String, Vec<NaiveDate>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let config = Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            role: lookup("APP_ROLE").map(|r| r.parse()).transpose()?.unwrap_or(AppRole::Api),
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            worker_queues: lookup("WORKER_QUEUES")
                .map(|q| split_list(&q))
                .unwrap_or_else(|| vec![SHORT_QUEUE.to_string(), DEFAULT_QUEUE.to_string(), LONG_QUEUE.to_string()]),
            worker_poll_ms: parse_or(&lookup, "WORKER_POLL_MS", 1000)?,
            worker_concurrency: parse_or(&lookup, "WORKER_CONCURRENCY", 1)?,
            queue_default_timeout_secs: parse_or(&lookup, "QUEUE_DEFAULT_TIMEOUT_SECS", 6 * 60 * 60)?,
            polygon_api_key: lookup("POLYGON_API_KEY").filter(|k| !k.trim().is_empty()),
            polygon_requests_per_minute: parse_or(&lookup, "POLYGON_REQUESTS_PER_MINUTE", 0)?,
            market_holidays: lookup("MARKET_HOLIDAYS")
                .map(|h| parse_holidays(&h))
                .transpose()?
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_queues.is_empty() {
            return Err(ConfigError::Invalid { key: "WORKER_QUEUES", value: String::new() });
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid { key: "WORKER_CONCURRENCY", value: "0".into() });
        }
        if self.queue_default_timeout_secs == 0 {
            return Err(ConfigError::Invalid { key: "QUEUE_DEFAULT_TIMEOUT_SECS", value: "0".into() });
        }
        if self.role == AppRole::Worker && self.polygon_api_key.is_none() {
            return Err(ConfigError::Missing("POLYGON_API_KEY"));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `XNYS:2025-01-09,XNYS:2018-12-05`
fn parse_holidays(raw: &str) -> Result<HashMap<String, Vec<NaiveDate>>, ConfigError> {
    let mut holidays: HashMap<String, Vec<NaiveDate>> = HashMap::new();
    for entry in split_list(raw) {
        let invalid = || ConfigError::Invalid { key: "MARKET_HOLIDAYS", value: entry.clone() };
        let (code, date) = entry.split_once(':').ok_or_else(invalid)?;
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
        holidays.entry(code.trim().to_uppercase()).or_default().push(date);
    }
    Ok(holidays)
}

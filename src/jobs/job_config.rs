use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::JobError;

/// String-keyed job configuration.
///
/// `merge` has replace semantics: every override key wins, including explicit
/// `null` and empty values. Readers treat `null` the same as an absent key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobConfig(Map<String, Value>);

impl JobConfig {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn merge(&mut self, overrides: JobConfig) {
        for (key, value) in overrides.0 {
            self.0.insert(key, value);
        }
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.0.get(key).map(|v| !v.is_null()).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, JobError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(JobError::Config(format!("'{}' must be a string, got {}", key, other))),
        }
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, JobError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| JobError::Config(format!("'{}' must be an integer", key))),
            Some(Value::String(s)) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|_| JobError::Config(format!("'{}' must be an integer, got '{}'", key, s))),
            Some(other) => Err(JobError::Config(format!("'{}' must be an integer, got {}", key, other))),
        }
    }

    /// Dates are `yyyy-MM-dd` strings.
    pub fn get_date(&self, key: &str) -> Result<Option<NaiveDate>, JobError> {
        match self.get_str(key)? {
            None => Ok(None),
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| JobError::Config(format!("'{}' must be a yyyy-MM-dd date, got '{}'", key, s))),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for JobConfig {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::JobError;
use crate::jobs::{
    seed_daily_agg_job::SeedDailyAggJob, seed_sma_job::SeedSmaJob, seed_tickers_job::SeedTickersJob,
    Job, JobConfig,
};
use crate::models::JobDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SeedTickers,
    SeedDailyAgg,
    SeedSma,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::SeedTickers, JobKind::SeedDailyAgg, JobKind::SeedSma];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SeedTickers => "seed_tickers",
            JobKind::SeedDailyAgg => "seed_daily_agg",
            JobKind::SeedSma => "seed_sma",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| JobError::UnknownJobType(s.to_string()))
    }
}

pub type JobFactory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// Maps job classes to constructors. Populated once at startup.
#[derive(Clone, Default)]
pub struct JobRegistry {
    factories: HashMap<JobKind, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(JobKind::SeedTickers, Arc::new(|| Box::new(SeedTickersJob::default())));
        registry.register(JobKind::SeedDailyAgg, Arc::new(|| Box::new(SeedDailyAggJob::default())));
        registry.register(JobKind::SeedSma, Arc::new(|| Box::new(SeedSmaJob::default())));
        registry
    }

    pub fn register(&mut self, kind: JobKind, factory: JobFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn is_registered(&self, job_class: &str) -> bool {
        JobKind::from_str(job_class)
            .map(|k| self.factories.contains_key(&k))
            .unwrap_or(false)
    }

    /// Builds a fresh job for `job_class` carrying `config` and the owning definition.
    pub fn build(
        &self,
        job_class: &str,
        config: JobConfig,
        definition_id: Option<i64>,
    ) -> Result<Box<dyn Job>, JobError> {
        let kind = JobKind::from_str(job_class)?;
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| JobError::UnknownJobType(job_class.to_string()))?;

        let mut job = factory();
        let base = job.base_mut();
        base.config = config;
        base.definition_id = definition_id;
        Ok(job)
    }

    /// A pre-configured instance of the definition's job class.
    pub fn instantiate(&self, definition: &JobDefinition) -> Result<Box<dyn Job>, JobError> {
        self.build(
            &definition.job_class,
            definition.default_config.0.clone(),
            Some(definition.id),
        )
    }
}

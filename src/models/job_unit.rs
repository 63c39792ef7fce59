use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Durable record of one execution of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobUnitRecord {
    pub id: i64,
    pub job_class: String,
    pub job_def_id: Option<i64>,
    pub failed: bool,
    pub acknowledged: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub queue_token: Option<String>,
}

impl JobUnitRecord {
    pub fn new(id: i64, job_class: &str, job_def_id: Option<i64>) -> Self {
        Self {
            id,
            job_class: job_class.to_string(),
            job_def_id,
            failed: false,
            acknowledged: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            queue_token: None,
        }
    }

    pub fn state(&self) -> JobUnitState {
        match (self.started_at, self.ended_at, self.failed) {
            (_, Some(_), true) => JobUnitState::Failed,
            (_, Some(_), false) => JobUnitState::Succeeded,
            (Some(_), None, _) => JobUnitState::Started,
            (None, None, _) => JobUnitState::Created,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobUnitState {
    Created,
    Started,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobUnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobUnitState::Created => "created",
            JobUnitState::Started => "started",
            JobUnitState::Succeeded => "succeeded",
            JobUnitState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobStat {
    pub id: i64,
    pub job_unit_id: i64,
    pub key: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobLog {
    pub id: i64,
    pub job_unit_id: i64,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

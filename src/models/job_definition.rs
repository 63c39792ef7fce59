use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::jobs::JobConfig;

// A durable, named job template. `job_class` is resolved through the job registry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDefinition {
    pub id: i64,
    pub display_name: String,
    pub default_config: Json<JobConfig>,
    pub job_class: String,
    pub enabled: bool,
    pub queue_name: String,
    pub schedule: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobDefinition {
    pub display_name: String,
    pub job_class: String,
    #[serde(default)]
    pub default_config: JobConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    pub schedule: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_queue_name() -> String {
    crate::services::queue_service::DEFAULT_QUEUE.to_string()
}

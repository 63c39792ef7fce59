use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// One row of the append-only identity ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GlobalId {
    pub id: i64,
    pub claimed: bool,
    pub table_name: String,
    pub class_name: String,
    pub created_at: DateTime<Utc>,
}

/// Table names recorded on the ledger for the records this crate owns.
pub mod owning_table {
    pub const JOB_UNIT: &str = "job_unit";
    pub const JOB_DEF: &str = "job_def";
    pub const TICKER: &str = "core_ticker";
}

mod global_id;
mod job_definition;
mod job_unit;
mod market;

pub use global_id::{owning_table, GlobalId};
pub use job_definition::{CreateJobDefinition, JobDefinition};
pub use job_unit::{JobLog, JobStat, JobUnitRecord, JobUnitState};
pub use market::{DailyBar, NewTicker, SmaPoint, Ticker};

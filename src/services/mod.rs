pub mod backfill_service;
pub mod identity_service;
pub mod job_scheduler_service;
pub mod job_unit_service;
pub mod queue_service;
pub mod rate_limiter;
pub mod trading_calendar;
pub mod worker_service;

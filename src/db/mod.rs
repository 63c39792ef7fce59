pub mod global_id_queries;
pub mod job_definition_queries;
pub mod job_unit_queries;
pub mod market_queries;

/// Upper bound on rows per multi-row insert statement.
pub const BATCH_CHUNK_SIZE: usize = 1000;

pub mod market_data_provider;
pub mod memory_queue;
pub mod polygon;
pub mod queue_backend;
pub mod redis_queue;

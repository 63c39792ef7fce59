use std::sync::Arc;

use crate::jobs::JobRegistry;
use crate::services::queue_service::QueueRegistry;
use crate::store::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queues: Arc<QueueRegistry>,
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    /// Shares the queue registry's store so enqueue and polling see the same rows.
    pub fn new(queues: Arc<QueueRegistry>, jobs: Arc<JobRegistry>) -> Self {
        Self { store: queues.store(), queues, jobs }
    }
}

pub(crate) mod health;
pub(crate) mod job_definitions;
pub(crate) mod job_units;
pub(crate) mod jobs;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, Response};
    use serde_json::Value;

    use crate::external::memory_queue::MemoryQueueBackend;
    use crate::jobs::JobRegistry;
    use crate::services::queue_service::QueueRegistry;
    use crate::state::AppState;
    use crate::store::MemoryJobStore;

    pub struct TestApp {
        pub state: AppState,
        pub store: MemoryJobStore,
        pub backend: MemoryQueueBackend,
    }

    pub fn test_app() -> TestApp {
        let store = MemoryJobStore::new();
        let backend = MemoryQueueBackend::new();
        let queues = Arc::new(QueueRegistry::new(Arc::new(backend.clone()), Arc::new(store.clone()), 60));
        let state = AppState::new(queues, Arc::new(JobRegistry::with_defaults()));
        TestApp { state, store, backend }
    }

    pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub async fn body_json(resp: Response<Body>) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

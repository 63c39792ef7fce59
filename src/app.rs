use axum::Router;
use tower_http::trace::TraceLayer;

use crate::routes::{health, job_definitions, job_units, jobs};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/jobs", jobs::router())
        .nest("/api/job-units", job_units::router())
        .nest("/api/job-definitions", job_definitions::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tracing::{info, warn};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    info!("GET /health - Health check");
    match state.store.count_units().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            warn!("Health check could not reach the job store: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

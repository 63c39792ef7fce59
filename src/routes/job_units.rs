use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::{JobLog, JobStat, JobUnitRecord, JobUnitState};
use crate::services::job_unit_service::JobUnit;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_job_unit))
        .route("/:id/ack", post(acknowledge_job_unit))
}

#[derive(Debug, Serialize)]
struct JobUnitDetail {
    #[serde(flatten)]
    unit: JobUnitRecord,
    state: JobUnitState,
    stats: Vec<JobStat>,
    logs: Vec<JobLog>,
}

async fn load_detail(state: &AppState, id: i64) -> Result<JobUnitDetail, AppError> {
    let unit = state
        .store
        .find_unit(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job unit {} not found", id)))?;
    let stats = state.store.list_stats(id).await?;
    let logs = state.store.list_logs(id).await?;

    Ok(JobUnitDetail { state: unit.state(), unit, stats, logs })
}

/// GET /api/job-units/:id - Timing, outcome, stats and logs of one execution
async fn get_job_unit(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobUnitDetail>, AppError> {
    Ok(Json(load_detail(&state, id).await?))
}

/// POST /api/job-units/:id/ack - Mark a failed execution as seen
async fn acknowledge_job_unit(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobUnitDetail>, AppError> {
    let unit = JobUnit::load(state.store.clone(), id).await?;
    unit.acknowledge().await?;
    info!("POST /api/job-units/{}/ack - Failure acknowledged", id);

    Ok(Json(load_detail(&state, id).await?))
}

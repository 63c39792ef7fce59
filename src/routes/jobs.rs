use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::external::queue_backend::TaskStatus;
use crate::jobs::JobConfig;
use crate::models::{JobDefinition, JobUnitRecord, JobUnitState};
use crate::services::queue_service::{validate_queue_name, TaskHandle};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(enqueue_job))
        .route("/:token", get(job_status))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub definition_id: Option<i64>,
    pub display_name: Option<String>,
    /// Merged over the definition's defaults.
    pub config: Option<JobConfig>,
    /// Overrides the definition's queue.
    pub queue: Option<String>,
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    token: String,
    queue: String,
    job_class: String,
    status: TaskStatus,
    error: Option<String>,
    enqueued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    unit: Option<JobUnitRecord>,
    unit_state: Option<JobUnitState>,
}

async fn find_definition(state: &AppState, req: &EnqueueJobRequest) -> Result<JobDefinition, AppError> {
    match (req.definition_id, req.display_name.as_deref()) {
        (Some(id), None) => state
            .store
            .find_definition(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job definition {} not found", id))),
        (None, Some(name)) => state
            .store
            .find_definition_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job definition '{}' not found", name))),
        _ => Err(AppError::Validation(
            "Exactly one of definition_id or display_name must be provided".to_string(),
        )),
    }
}

/// POST /api/jobs - Build a job from a definition and enqueue it
async fn enqueue_job(
    State(state): State<AppState>,
    Json(req): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<TaskHandle>), AppError> {
    let definition = find_definition(&state, &req).await?;
    if !definition.enabled {
        return Err(AppError::Conflict(format!("Job definition '{}' is disabled", definition.display_name)));
    }

    let mut job = state.jobs.instantiate(&definition)?;
    if let Some(overrides) = req.config {
        job.configure(overrides);
    }

    let queue = req.queue.unwrap_or_else(|| definition.queue_name.clone());
    validate_queue_name(&queue)?;
    let handle = state.queues.get_queue(&queue).put(job.as_ref()).await?;

    info!(
        "POST /api/jobs - '{}' enqueued on '{}' as job unit {}",
        definition.display_name, handle.queue, handle.job_unit_id
    );
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// GET /api/jobs/:token - Task status plus the job unit it is bound to
async fn job_status(
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let task = state
        .queues
        .find_job(&token)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", token)))?;
    // The token is written onto the unit at commit; fall back to the task's metadata
    let unit = match state.store.find_unit_by_token(&token).await? {
        Some(unit) => Some(unit),
        None => state.store.find_unit(task.envelope.meta.job_unit_id).await?,
    };

    Ok(Json(JobStatusResponse {
        token: task.token,
        queue: task.queue,
        job_class: task.envelope.job_class,
        status: task.status,
        error: task.error,
        enqueued_at: task.enqueued_at,
        started_at: task.started_at,
        ended_at: task.ended_at,
        unit_state: unit.as_ref().map(|u| u.state()),
        unit,
    }))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::info;

use crate::errors::AppError;
use crate::models::{CreateJobDefinition, JobDefinition};
use crate::services::queue_service::validate_queue_name;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_definitions).post(create_definition))
        .route("/:id", get(get_definition))
}

/// GET /api/job-definitions - All definitions, by display name
async fn list_definitions(State(state): State<AppState>) -> Result<Json<Vec<JobDefinition>>, AppError> {
    Ok(Json(state.store.list_definitions().await?))
}

/// GET /api/job-definitions/:id
async fn get_definition(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobDefinition>, AppError> {
    state
        .store
        .find_definition(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job definition {} not found", id)))
}

/// POST /api/job-definitions - Register a named job template
async fn create_definition(
    State(state): State<AppState>,
    Json(new): Json<CreateJobDefinition>,
) -> Result<(StatusCode, Json<JobDefinition>), AppError> {
    if new.display_name.trim().is_empty() {
        return Err(AppError::Validation("display_name must not be empty".to_string()));
    }
    validate_queue_name(&new.queue_name)?;
    if !state.jobs.is_registered(&new.job_class) {
        return Err(AppError::Validation(format!("Unknown job type: {}", new.job_class)));
    }

    // Catch bad defaults now rather than on the first scheduled run
    state
        .jobs
        .build(&new.job_class, new.default_config.clone(), None)?
        .validate()?;

    let definition = state.store.create_definition(&new).await?;
    info!("POST /api/job-definitions - Created '{}' ({})", definition.display_name, definition.id);
    Ok((StatusCode::CREATED, Json(definition)))
}

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use thiserror::Error;

use crate::external::market_data_provider::ProviderError;
use crate::external::queue_backend::QueueError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(StoreError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),
    #[error("External error: {0}")]
    External(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            AppError::QueueUnavailable(msg) => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("30"));
                (StatusCode::SERVICE_UNAVAILABLE, headers, msg).into_response()
            }
            AppError::External(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Db(other),
        }
    }
}

impl From<JobError> for AppError {
    fn from(value: JobError) -> Self {
        match value {
            JobError::Config(msg) => AppError::Validation(msg),
            JobError::UnknownJobType(class) => AppError::Validation(format!("Unknown job type: {}", class)),
            JobError::InvalidTransition { .. } => AppError::Conflict(value.to_string()),
            JobError::Queue(e) => AppError::QueueUnavailable(e.to_string()),
            JobError::Store(e) => AppError::from(e),
            JobError::Provider(e) => AppError::External(e.to_string()),
            JobError::NotFound(msg) => AppError::NotFound(msg),
            JobError::Timeout(_) => AppError::External(value.to_string()),
        }
    }
}

/// Storage-layer failures, shared by the Postgres and in-memory stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Unique-constraint violations are benign for idempotent inserts.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            StoreError::Conflict(_) => true,
            _ => false,
        }
    }
}

/// Errors raised while configuring, enqueuing or running a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("bad config: {0}")]
    Config(String),
    #[error("unknown job type '{0}'")]
    UnknownJobType(String),
    #[error("job unit {unit_id} cannot {action} from state {state}")]
    InvalidTransition {
        unit_id: i64,
        action: &'static str,
        state: crate::models::JobUnitState,
    },
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("job timed out after {0}s")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobUnitState;

    #[test]
    fn test_config_error_maps_to_bad_request() {
        let resp = AppError::from(JobError::Config("ticker and market are mutually exclusive".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_queue_error_maps_to_service_unavailable() {
        let resp = AppError::from(JobError::Queue(QueueError::Connection("refused".into())))
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.headers().contains_key("Retry-After"));
    }

    #[test]
    fn test_invalid_transition_maps_to_conflict() {
        let err = JobError::InvalidTransition { unit_id: 1, action: "end", state: JobUnitState::Failed };
        assert_eq!(err.to_string(), "job unit 1 cannot end from state failed");
        let resp = AppError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_store_conflict_is_unique_violation() {
        assert!(StoreError::Conflict("dup".into()).is_unique_violation());
        assert!(!StoreError::NotFound("x".into()).is_unique_violation());
    }
}

use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::global_id_queries;
use crate::models::{owning_table, CreateJobDefinition, JobDefinition};

const DEFINITION_COLUMNS: &str =
    "id, display_name, default_config, job_class, enabled, queue_name, schedule, created_at";

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<JobDefinition>, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>(&format!("SELECT {} FROM job_def WHERE id = $1", DEFINITION_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_display_name(
    pool: &PgPool,
    display_name: &str,
) -> Result<Option<JobDefinition>, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>(&format!(
        "SELECT {} FROM job_def WHERE display_name = $1",
        DEFINITION_COLUMNS
    ))
    .bind(display_name)
    .fetch_optional(pool)
    .await
}

pub async fn find_all(pool: &PgPool) -> Result<Vec<JobDefinition>, sqlx::Error> {
    sqlx::query_as::<_, JobDefinition>(&format!(
        "SELECT {} FROM job_def ORDER BY display_name",
        DEFINITION_COLUMNS
    ))
    .fetch_all(pool)
    .await
}

pub async fn create(pool: &PgPool, new: &CreateJobDefinition) -> Result<JobDefinition, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let gid = global_id_queries::allocate(&mut *tx, owning_table::JOB_DEF, "JobDefinition").await?;
    let definition = sqlx::query_as::<_, JobDefinition>(&format!(
        r#"
        INSERT INTO job_def (id, display_name, default_config, job_class, enabled, queue_name, schedule, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        RETURNING {}
        "#,
        DEFINITION_COLUMNS
    ))
    .bind(gid.id)
    .bind(&new.display_name)
    .bind(Json(&new.default_config))
    .bind(&new.job_class)
    .bind(new.enabled)
    .bind(&new.queue_name)
    .bind(&new.schedule)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(definition)
}

use sqlx::{PgExecutor, PgPool};
use tracing::error;

use crate::models::{JobLog, JobStat, JobUnitRecord};

const UNIT_COLUMNS: &str =
    "id, job_class, job_def_id, failed, acknowledged, created_at, started_at, ended_at, queue_token";

pub async fn insert_unit<'e, E>(executor: E, unit: &JobUnitRecord) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO job_unit
            (id, job_class, job_def_id, failed, acknowledged, created_at, started_at, ended_at, queue_token)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(unit.id)
    .bind(&unit.job_class)
    .bind(unit.job_def_id)
    .bind(unit.failed)
    .bind(unit.acknowledged)
    .bind(unit.created_at)
    .bind(unit.started_at)
    .bind(unit.ended_at)
    .bind(&unit.queue_token)
    .execute(executor)
    .await?;
    Ok(())
}

/// Returns the number of rows touched so callers can detect a missing unit.
pub async fn update_unit<'e, E>(executor: E, unit: &JobUnitRecord) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE job_unit
        SET failed = $2,
            acknowledged = $3,
            started_at = $4,
            ended_at = $5,
            queue_token = $6
        WHERE id = $1
        "#,
    )
    .bind(unit.id)
    .bind(unit.failed)
    .bind(unit.acknowledged)
    .bind(unit.started_at)
    .bind(unit.ended_at)
    .bind(&unit.queue_token)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_queue_token<'e, E>(executor: E, unit_id: i64, token: &str) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("UPDATE job_unit SET queue_token = $2 WHERE id = $1")
        .bind(unit_id)
        .bind(token)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<JobUnitRecord>, sqlx::Error> {
    sqlx::query_as::<_, JobUnitRecord>(&format!("SELECT {} FROM job_unit WHERE id = $1", UNIT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_token(pool: &PgPool, token: &str) -> Result<Option<JobUnitRecord>, sqlx::Error> {
    sqlx::query_as::<_, JobUnitRecord>(&format!(
        "SELECT {} FROM job_unit WHERE queue_token = $1",
        UNIT_COLUMNS
    ))
    .bind(token)
    .fetch_optional(pool)
    .await
}

pub async fn count_units(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_unit")
        .fetch_one(pool)
        .await
}

pub async fn insert_stat(
    pool: &PgPool,
    unit_id: i64,
    key: &str,
    value: f64,
) -> Result<JobStat, sqlx::Error> {
    sqlx::query_as::<_, JobStat>(
        r#"
        INSERT INTO job_unit_stat (job_unit_id, key, value)
        VALUES ($1, $2, $3)
        RETURNING id, job_unit_id, key, value
        "#,
    )
    .bind(unit_id)
    .bind(key)
    .bind(value)
    .fetch_one(pool)
    .await
}

pub async fn update_stat<'e, E>(executor: E, stat: &JobStat) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query("UPDATE job_unit_stat SET value = $2 WHERE id = $1")
        .bind(stat.id)
        .bind(stat.value)
        .execute(executor)
        .await?;
    Ok(())
}

/// Unit row and stat values commit together or not at all.
pub async fn flush_unit(pool: &PgPool, unit: &JobUnitRecord, stats: &[JobStat]) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    for stat in stats {
        update_stat(&mut *tx, stat).await.map_err(|e| {
            error!("Failed to flush stat '{}' for job unit {}: {}", stat.key, unit.id, e);
            e
        })?;
    }
    let touched = update_unit(&mut *tx, unit).await?;

    tx.commit().await?;
    Ok(touched)
}

pub async fn list_stats(pool: &PgPool, unit_id: i64) -> Result<Vec<JobStat>, sqlx::Error> {
    sqlx::query_as::<_, JobStat>(
        "SELECT id, job_unit_id, key, value FROM job_unit_stat WHERE job_unit_id = $1 ORDER BY id",
    )
    .bind(unit_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_log(pool: &PgPool, unit_id: i64, message: &str) -> Result<JobLog, sqlx::Error> {
    sqlx::query_as::<_, JobLog>(
        r#"
        INSERT INTO job_unit_log (job_unit_id, message, logged_at)
        VALUES ($1, $2, NOW())
        RETURNING id, job_unit_id, message, logged_at
        "#,
    )
    .bind(unit_id)
    .bind(message)
    .fetch_one(pool)
    .await
}

pub async fn list_logs(pool: &PgPool, unit_id: i64) -> Result<Vec<JobLog>, sqlx::Error> {
    sqlx::query_as::<_, JobLog>(
        r#"
        SELECT id, job_unit_id, message, logged_at
        FROM job_unit_log
        WHERE job_unit_id = $1
        ORDER BY logged_at ASC, id ASC
        "#,
    )
    .bind(unit_id)
    .fetch_all(pool)
    .await
}

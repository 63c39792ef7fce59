use sqlx::PgExecutor;

use crate::models::GlobalId;

/// Draws the next value from `global_id_seq` and records the ledger row.
///
/// Run this on the same transaction that inserts the entity: a rollback then
/// discards the ledger row along with it (the sequence value is simply skipped).
pub async fn allocate<'e, E>(
    executor: E,
    table_name: &str,
    class_name: &str,
) -> Result<GlobalId, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, GlobalId>(
        r#"
        INSERT INTO global_id (id, claimed, table_name, class_name, created_at)
        VALUES (nextval('global_id_seq'), TRUE, $1, $2, NOW())
        RETURNING id, claimed, table_name, class_name, created_at
        "#,
    )
    .bind(table_name)
    .bind(class_name)
    .fetch_one(executor)
    .await
}

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<GlobalId>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, GlobalId>(
        "SELECT id, claimed, table_name, class_name, created_at FROM global_id WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

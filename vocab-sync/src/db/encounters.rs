//! Encounter database operations
//!
//! Encounters are append-only; the only mutation is relinking during a merge.

use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;
use vocab_common::time::now_timestamp;
use vocab_common::Result;

/// Record that the user saw a word in a source
pub async fn insert_encounter(
    pool: &SqlitePool,
    user_id: Uuid,
    vocabulary_id: Uuid,
    source_id: Option<Uuid>,
    context: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = now_timestamp();

    sqlx::query(
        r#"
        INSERT INTO encounters (id, user_id, vocabulary_id, source_id, context, occurred_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .bind(source_id.map(|id| id.to_string()))
    .bind(context)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Point every encounter of `from` at `to`; returns the number moved
pub async fn relocate<'e, E>(executor: E, from: Uuid, to: Uuid) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE encounters SET vocabulary_id = ? WHERE vocabulary_id = ?")
        .bind(to.to_string())
        .bind(from.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Sentence from the most recent encounter, passed to AI enrichment as context
pub async fn latest_context(pool: &SqlitePool, user_id: Uuid, vocabulary_id: Uuid) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> = sqlx::query_as(
        r#"
        SELECT context FROM encounters
        WHERE user_id = ? AND vocabulary_id = ? AND context IS NOT NULL AND context <> ''
        ORDER BY occurred_at DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(context,)| context))
}

pub async fn count_for_vocabulary(pool: &SqlitePool, vocabulary_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM encounters WHERE vocabulary_id = ?")
        .bind(vocabulary_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

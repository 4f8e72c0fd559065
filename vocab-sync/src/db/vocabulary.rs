//! Vocabulary database operations
//!
//! The partial unique index on `(user_id, word) WHERE deleted_at IS NULL`
//! is the source of truth for per-user identity. Inserts report a lost race
//! as `InsertOutcome::AlreadyExists` instead of an error.

use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;
use vocab_common::time::now_timestamp;
use vocab_common::{Error, Result};

use super::{parse_optional_uuid, parse_uuid};
use crate::models::{InsertOutcome, VocabularyRow};

const VOCABULARY_COLUMNS: &str =
    "id, user_id, word, stem, global_dictionary_id, version, created_at, updated_at, deleted_at";

fn row_to_vocabulary(row: &SqliteRow) -> Result<VocabularyRow> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");

    Ok(VocabularyRow {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        word: row.get("word"),
        stem: row.get("stem"),
        global_dictionary_id: parse_optional_uuid(row.get("global_dictionary_id"))?,
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    })
}

/// Load a vocabulary row regardless of owner or tombstone
pub async fn load_vocabulary<'e, E>(executor: E, id: Uuid) -> Result<Option<VocabularyRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {VOCABULARY_COLUMNS} FROM vocabulary WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_vocabulary).transpose()
}

/// Load active rows owned by `user_id` among `ids` (unknown or foreign ids are skipped)
pub async fn load_active_many(
    pool: &SqlitePool,
    user_id: Uuid,
    ids: &[Uuid],
) -> Result<Vec<VocabularyRow>> {
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(row) = load_vocabulary(pool, *id).await? {
            if row.user_id == user_id && row.is_active() {
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

/// Id of the active row for (user, normalized word)
pub async fn find_active_by_word<'e, E>(executor: E, user_id: Uuid, word: &str) -> Result<Option<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM vocabulary WHERE user_id = ? AND word = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .bind(word)
    .fetch_optional(executor)
    .await?;

    row.map(|(id,)| parse_uuid(&id)).transpose()
}

/// Oldest tombstoned row for (user, normalized word)
pub async fn find_oldest_tombstone<'e, E>(executor: E, user_id: Uuid, word: &str) -> Result<Option<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT id FROM vocabulary
        WHERE user_id = ? AND word = ? AND deleted_at IS NOT NULL
        ORDER BY created_at ASC, id ASC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(word)
    .fetch_optional(executor)
    .await?;

    row.map(|(id,)| parse_uuid(&id)).transpose()
}

/// Clear a tombstone, optionally attaching a canonical entry
///
/// Returns `false` when the row was no longer tombstoned. A unique violation
/// means another active row for the same word appeared first; it is returned
/// as an error for the caller to classify.
pub async fn reactivate<'e, E>(executor: E, id: Uuid, canonical_entry_id: Option<Uuid>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE vocabulary
        SET deleted_at = NULL,
            global_dictionary_id = COALESCE(?, global_dictionary_id),
            version = version + 1,
            updated_at = ?
        WHERE id = ? AND deleted_at IS NOT NULL
        "#,
    )
    .bind(canonical_entry_id.map(|id| id.to_string()))
    .bind(now_timestamp())
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert a new active row, reporting a lost race as `AlreadyExists`
///
/// `stem` starts out as the word itself; enrichment replaces it with the lemma.
pub async fn insert_active(
    pool: &SqlitePool,
    id: Uuid,
    user_id: Uuid,
    word: &str,
    canonical_entry_id: Option<Uuid>,
) -> Result<InsertOutcome> {
    let now = now_timestamp();
    let inserted = sqlx::query(
        r#"
        INSERT INTO vocabulary (id, user_id, word, stem, global_dictionary_id, version, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(word)
    .bind(word)
    .bind(canonical_entry_id.map(|id| id.to_string()))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(Error::from);

    match inserted {
        Ok(_) => Ok(InsertOutcome::Created(id)),
        Err(err) if err.is_unique_violation() => match find_active_by_word(pool, user_id, word).await? {
            Some(existing) => Ok(InsertOutcome::AlreadyExists(existing)),
            // Primary key collision with an unrelated row
            None => Err(Error::InvalidInput(format!("vocabulary id {} is already in use", id))),
        },
        Err(err) => Err(err),
    }
}

/// Link a row to a canonical entry, optionally replacing its stem
pub async fn link_entry<'e, E>(executor: E, id: Uuid, entry_id: Uuid, stem: Option<&str>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE vocabulary
        SET global_dictionary_id = ?,
            stem = COALESCE(?, stem),
            version = version + 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(entry_id.to_string())
    .bind(stem)
    .bind(now_timestamp())
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Active rows for (user, canonical entry), oldest first (ties by id)
pub async fn active_ids_for_entry<'e, E>(executor: E, user_id: Uuid, entry_id: Uuid) -> Result<Vec<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT id FROM vocabulary
        WHERE user_id = ? AND global_dictionary_id = ? AND deleted_at IS NULL
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(user_id.to_string())
    .bind(entry_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(|(id,)| parse_uuid(id)).collect()
}

/// Remove the canonical link (first half of a merge)
pub async fn clear_entry_link<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE vocabulary SET global_dictionary_id = NULL, version = version + 1, updated_at = ? WHERE id = ?",
    )
    .bind(now_timestamp())
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

/// Tombstone a row (no-op when already deleted)
pub async fn soft_delete<'e, E>(executor: E, id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = now_timestamp();
    let result = sqlx::query(
        r#"
        UPDATE vocabulary
        SET deleted_at = ?, version = version + 1, updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Oldest active rows without a canonical entry that are still worth a pass
///
/// Rows whose queue item is `processing`, `done` or `error` are left out so
/// they cannot crowd newer words out of the batch. `include_finished` brings
/// `done` and `error` items back for an explicit re-enrichment.
pub async fn list_unenriched(
    pool: &SqlitePool,
    user_id: Uuid,
    limit: i64,
    include_finished: bool,
) -> Result<Vec<VocabularyRow>> {
    let columns: Vec<String> = VOCABULARY_COLUMNS.split(", ").map(|c| format!("v.{c}")).collect();
    let sql = format!(
        r#"
        SELECT {} FROM vocabulary v
        LEFT JOIN enrichment_queue q ON q.user_id = v.user_id AND q.vocabulary_id = v.id
        WHERE v.user_id = ? AND v.deleted_at IS NULL AND v.global_dictionary_id IS NULL
          AND (q.status IS NULL OR q.status = 'pending' OR (? AND q.status IN ('done', 'error')))
        ORDER BY v.created_at ASC, v.id ASC
        LIMIT ?
        "#,
        columns.join(", ")
    );
    let rows = sqlx::query(&sql)
        .bind(user_id.to_string())
        .bind(include_finished)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_vocabulary).collect()
}

/// (enriched, un-enriched) counts over the user's active rows
pub async fn count_by_enrichment(pool: &SqlitePool, user_id: Uuid) -> Result<(i64, i64)> {
    let (enriched, unenriched): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN global_dictionary_id IS NOT NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN global_dictionary_id IS NULL THEN 1 ELSE 0 END), 0)
        FROM vocabulary
        WHERE user_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok((enriched, unenriched))
}

/// Active rows the user encountered on the page at `url`, first encounter first
pub async fn list_for_page(pool: &SqlitePool, user_id: Uuid, url: &str) -> Result<Vec<VocabularyRow>> {
    let columns: Vec<String> = VOCABULARY_COLUMNS.split(", ").map(|c| format!("v.{c}")).collect();
    let sql = format!(
        r#"
        SELECT {} FROM vocabulary v
        JOIN encounters e ON e.vocabulary_id = v.id
        JOIN sources s ON s.id = e.source_id
        WHERE v.user_id = ? AND v.deleted_at IS NULL
          AND s.user_id = ? AND s.url = ? AND s.deleted_at IS NULL
        GROUP BY v.id
        ORDER BY MIN(e.occurred_at) ASC, v.id ASC
        "#,
        columns.join(", ")
    );
    let rows = sqlx::query(&sql)
        .bind(user_id.to_string())
        .bind(user_id.to_string())
        .bind(url)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_vocabulary).collect()
}

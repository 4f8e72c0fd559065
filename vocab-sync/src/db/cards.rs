//! Learning card database operations
//!
//! Cards follow their vocabulary row: reactivated, created and tombstoned in
//! lockstep. At most one active card per (user, vocabulary) is enforced by a
//! partial unique index.

use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;
use vocab_common::api::CardProgress;
use vocab_common::time::now_timestamp;
use vocab_common::{Error, Result};

use super::parse_uuid;
use crate::models::InsertOutcome;

/// Id of the active card for a vocabulary row
pub async fn find_active_card<'e, E>(executor: E, user_id: Uuid, vocabulary_id: Uuid) -> Result<Option<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM learning_cards WHERE user_id = ? AND vocabulary_id = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.map(|(id,)| parse_uuid(&id)).transpose()
}

/// Make sure an active card exists for the vocabulary row
///
/// Reactivates the most recent tombstoned card, else inserts a card in the
/// initial state. A concurrent insert that wins the race counts as success.
pub async fn ensure_card(pool: &SqlitePool, user_id: Uuid, vocabulary_id: Uuid) -> Result<InsertOutcome> {
    if let Some(existing) = find_active_card(pool, user_id, vocabulary_id).await? {
        return Ok(InsertOutcome::AlreadyExists(existing));
    }

    let now = now_timestamp();

    let tombstone: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT id FROM learning_cards
        WHERE user_id = ? AND vocabulary_id = ? AND deleted_at IS NOT NULL
        ORDER BY updated_at DESC, id ASC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .fetch_optional(pool)
    .await?;

    if let Some((card_id,)) = tombstone {
        let reactivated = sqlx::query(
            r#"
            UPDATE learning_cards
            SET deleted_at = NULL, version = version + 1, updated_at = ?
            WHERE id = ? AND deleted_at IS NOT NULL
            "#,
        )
        .bind(&now)
        .bind(&card_id)
        .execute(pool)
        .await
        .map_err(Error::from);

        match reactivated {
            Ok(result) if result.rows_affected() == 1 => {
                tracing::debug!(card_id = %card_id, vocabulary_id = %vocabulary_id, "Reactivated learning card");
                return Ok(InsertOutcome::AlreadyExists(parse_uuid(&card_id)?));
            }
            Ok(_) => {}
            Err(err) if err.is_unique_violation() => {}
            Err(err) => return Err(err),
        }
    }

    let card_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO learning_cards (
            id, user_id, vocabulary_id, state, due, stability, difficulty,
            version, created_at, updated_at
        ) VALUES (?, ?, ?, 0, ?, 0, 0, 1, ?, ?)
        "#,
    )
    .bind(card_id.to_string())
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(Error::from);

    match inserted {
        Ok(_) => Ok(InsertOutcome::Created(card_id)),
        Err(err) if err.is_unique_violation() => {
            let existing = find_active_card(pool, user_id, vocabulary_id)
                .await?
                .ok_or_else(|| Error::Internal(format!("card for {} vanished after insert race", vocabulary_id)))?;
            Ok(InsertOutcome::AlreadyExists(existing))
        }
        Err(err) => Err(err),
    }
}

/// Active vocabulary rows of the user that have no active card
pub async fn missing_for_user(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT v.id FROM vocabulary v
        WHERE v.user_id = ? AND v.deleted_at IS NULL
          AND NOT EXISTS (
              SELECT 1 FROM learning_cards c
              WHERE c.user_id = v.user_id AND c.vocabulary_id = v.id AND c.deleted_at IS NULL
          )
        ORDER BY v.created_at ASC, v.id ASC
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(|(id,)| parse_uuid(id)).collect()
}

/// Tombstone the active card of a vocabulary row
pub async fn soft_delete_for_vocabulary<'e, E>(executor: E, user_id: Uuid, vocabulary_id: Uuid) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = now_timestamp();
    let result = sqlx::query(
        r#"
        UPDATE learning_cards
        SET deleted_at = ?, version = version + 1, updated_at = ?
        WHERE user_id = ? AND vocabulary_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// State and stability of the active card, used for stage mapping
pub async fn card_progress(pool: &SqlitePool, user_id: Uuid, vocabulary_id: Uuid) -> Result<Option<CardProgress>> {
    let row: Option<(i64, f64)> = sqlx::query_as(
        "SELECT state, stability FROM learning_cards WHERE user_id = ? AND vocabulary_id = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(state, stability)| CardProgress { state, stability }))
}

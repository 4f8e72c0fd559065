//! Enrichment queue operations
//!
//! One row per (user, vocabulary). Claiming is a single conditional UPDATE so
//! two workers can never both move the same item to `processing`.

use chrono::Duration;
use sqlx::SqlitePool;
use uuid::Uuid;
use vocab_common::time::{format_timestamp, now, now_timestamp};
use vocab_common::Result;

/// Queue item status as stored in `enrichment_queue.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
            QueueStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "done" => Some(QueueStatus::Done),
            "error" => Some(QueueStatus::Error),
            _ => None,
        }
    }
}

/// Atomically move the item for (user, vocabulary) to `processing`
///
/// Creates a pending item first if none exists. Returns `false` when another
/// worker holds the item or it is already done or failed for good.
pub async fn claim(pool: &SqlitePool, user_id: Uuid, vocabulary_id: Uuid) -> Result<bool> {
    let now = now_timestamp();

    sqlx::query(
        r#"
        INSERT INTO enrichment_queue (user_id, vocabulary_id, status, attempts, created_at, updated_at)
        VALUES (?, ?, 'pending', 0, ?, ?)
        ON CONFLICT(user_id, vocabulary_id) DO NOTHING
        "#,
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE enrichment_queue
        SET status = 'processing', updated_at = ?
        WHERE user_id = ? AND vocabulary_id = ? AND status = 'pending'
        "#,
    )
    .bind(&now)
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark the item done, creating it if the row was already linked before any claim
pub async fn mark_done(pool: &SqlitePool, user_id: Uuid, vocabulary_id: Uuid) -> Result<()> {
    let now = now_timestamp();
    sqlx::query(
        r#"
        INSERT INTO enrichment_queue (user_id, vocabulary_id, status, attempts, created_at, updated_at)
        VALUES (?, ?, 'done', 0, ?, ?)
        ON CONFLICT(user_id, vocabulary_id) DO UPDATE SET
            status = 'done',
            last_error = NULL,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Put an item back to `pending` with a fresh attempt budget
///
/// Used when a row must be enriched again: a reactivated row whose link was
/// cleared, or an explicit re-enrichment. An item another worker currently
/// holds is left alone.
pub async fn requeue(pool: &SqlitePool, user_id: Uuid, vocabulary_id: Uuid) -> Result<()> {
    let now = now_timestamp();
    sqlx::query(
        r#"
        INSERT INTO enrichment_queue (user_id, vocabulary_id, status, attempts, created_at, updated_at)
        VALUES (?, ?, 'pending', 0, ?, ?)
        ON CONFLICT(user_id, vocabulary_id) DO UPDATE SET
            status = 'pending',
            attempts = 0,
            last_error = NULL,
            updated_at = excluded.updated_at
        WHERE enrichment_queue.status <> 'processing'
        "#,
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed attempt
///
/// The item goes back to `pending`, or to `error` once `max_attempts` is
/// reached. Returns the resulting status.
pub async fn record_failure(
    pool: &SqlitePool,
    user_id: Uuid,
    vocabulary_id: Uuid,
    error: &str,
    max_attempts: i64,
) -> Result<QueueStatus> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE enrichment_queue
        SET attempts = attempts + 1,
            last_error = ?,
            status = CASE WHEN attempts + 1 >= ? THEN 'error' ELSE 'pending' END,
            updated_at = ?
        WHERE user_id = ? AND vocabulary_id = ?
        RETURNING status
        "#,
    )
    .bind(error)
    .bind(max_attempts)
    .bind(now_timestamp())
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(status
        .as_deref()
        .and_then(QueueStatus::parse)
        .unwrap_or(QueueStatus::Pending))
}

/// Return `processing` items untouched for `stale_minutes` to `pending`
pub async fn reset_stale(pool: &SqlitePool, stale_minutes: i64) -> Result<u64> {
    let cutoff = format_timestamp(now() - Duration::minutes(stale_minutes));

    let result = sqlx::query(
        r#"
        UPDATE enrichment_queue
        SET status = 'pending', updated_at = ?
        WHERE status = 'processing' AND updated_at < ?
        "#,
    )
    .bind(now_timestamp())
    .bind(&cutoff)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        tracing::info!(count = result.rows_affected(), "Reset stale enrichment queue items");
    }
    Ok(result.rows_affected())
}

pub async fn count_pending(pool: &SqlitePool, user_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrichment_queue WHERE user_id = ? AND status IN ('pending', 'processing')",
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Un-enriched active rows whose item gave up after the attempt limit
pub async fn count_errors(pool: &SqlitePool, user_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM enrichment_queue q
        JOIN vocabulary v ON v.id = q.vocabulary_id AND v.user_id = q.user_id
        WHERE q.user_id = ? AND q.status = 'error'
          AND v.deleted_at IS NULL AND v.global_dictionary_id IS NULL
        "#,
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Current status and attempt count of an item
pub async fn item_status(pool: &SqlitePool, user_id: Uuid, vocabulary_id: Uuid) -> Result<Option<(QueueStatus, i64)>> {
    let row: Option<(String, i64)> = sqlx::query_as(
        "SELECT status, attempts FROM enrichment_queue WHERE user_id = ? AND vocabulary_id = ?",
    )
    .bind(user_id.to_string())
    .bind(vocabulary_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(status, attempts)| QueueStatus::parse(&status).map(|s| (s, attempts))))
}

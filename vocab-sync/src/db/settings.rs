//! Settings database operations
//!
//! Typed accessors over the key/value `settings` table. Defaults are written
//! at database initialization; the fallbacks here cover rows removed by hand.

use sqlx::{Pool, Sqlite};
use vocab_common::{Error, Result};

/// Maximum total wait for a locked database before an operation fails
///
/// **Default:** 5000 ms
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, "database_max_lock_wait_ms").await.map(|opt| opt.unwrap_or(5000))
}

/// Number of enriched words to keep ready per user
///
/// **Default:** 10
pub async fn get_buffer_target(db: &Pool<Sqlite>) -> Result<i64> {
    get_setting(db, "enrichment_buffer_target").await.map(|opt| opt.unwrap_or(10))
}

/// Attempts before a queue item is marked `error`
///
/// **Default:** 3
pub async fn get_max_attempts(db: &Pool<Sqlite>) -> Result<i64> {
    get_setting(db, "enrichment_max_attempts").await.map(|opt| opt.unwrap_or(3))
}

/// Minutes after which a `processing` queue item counts as abandoned
///
/// **Default:** 5
pub async fn get_stale_minutes(db: &Pool<Sqlite>) -> Result<i64> {
    get_setting(db, "enrichment_stale_minutes").await.map(|opt| opt.unwrap_or(5))
}

/// How far a pull reaches back before the client's watermark
///
/// Covers writes that stamped `updated_at` before a concurrent pull but
/// committed after it; at least the SQLite busy timeout.
///
/// **Default:** 10000 ms
pub async fn get_pull_overlap_ms(db: &Pool<Sqlite>) -> Result<i64> {
    get_setting(db, "sync_pull_overlap_ms").await.map(|opt| opt.unwrap_or(10_000))
}

/// Generic setting getter (internal)
///
/// NULL values read as unset.
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row.and_then(|(value,)| value) {
        Some(value) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

//! Database access for vocab-sync
//!
//! Ids are stored as hyphenated UUID text; timestamps as canonical RFC 3339
//! strings (see `vocab_common::time`).

pub mod cards;
pub mod dictionary;
pub mod encounters;
pub mod queue;
pub mod settings;
pub mod sources;
pub mod sync_tables;
pub mod vocabulary;

use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;
use vocab_common::{Error, Result};

/// Initialize database connection pool
///
/// Creates the database file and schema on first run.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    vocab_common::db::init_database(db_path).await
}

/// Parse a stored id column
pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid stored id '{}': {}", value, e)))
}

/// Parse an optional stored id column
pub(crate) fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

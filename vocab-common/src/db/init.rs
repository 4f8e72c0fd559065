//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to date.
//! Every statement is `IF NOT EXISTS`, so initialization is safe to repeat on
//! each startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default SQLite busy timeout before a write reports `database is locked`
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Tables synchronized with client devices, in dependency order
pub const SYNC_TABLES: &[&str] = &[
    "books",
    "highlights",
    "sources",
    "vocabulary",
    "learning_cards",
    "encounters",
    "review_logs",
    "confusable_sets",
    "confusable_set_members",
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_api_tokens_table(pool).await?;

    // Shared dictionary
    create_global_dictionary_table(pool).await?;
    create_word_variants_table(pool).await?;

    // Per-user synchronized tables
    create_books_table(pool).await?;
    create_highlights_table(pool).await?;
    create_sources_table(pool).await?;
    create_vocabulary_table(pool).await?;
    create_learning_cards_table(pool).await?;
    create_encounters_table(pool).await?;
    create_review_logs_table(pool).await?;
    create_confusable_sets_table(pool).await?;
    create_confusable_set_members_table(pool).await?;

    create_enrichment_queue_table(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_api_tokens_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_tokens (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            expires_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_global_dictionary_table(pool: &SqlitePool) -> Result<()> {
    // translations: JSON object keyed by target language code,
    // each value {"primary", "alternatives", "source"}
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS global_dictionary (
            id TEXT PRIMARY KEY,
            language_code TEXT NOT NULL,
            lemma TEXT NOT NULL,
            translations TEXT NOT NULL DEFAULT '{}',
            pronunciation_ipa TEXT,
            part_of_speech TEXT,
            english_definition TEXT,
            synonyms TEXT NOT NULL DEFAULT '[]',
            confusables TEXT NOT NULL DEFAULT '[]',
            cefr_level TEXT,
            confidence REAL,
            enrichment_version INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_global_dictionary_lemma ON global_dictionary(language_code, lemma)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_word_variants_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS word_variants (
            language_code TEXT NOT NULL,
            variant TEXT NOT NULL,
            global_dictionary_id TEXT NOT NULL REFERENCES global_dictionary(id) ON DELETE CASCADE,
            method TEXT NOT NULL DEFAULT 'enrichment',
            created_at TEXT NOT NULL,
            PRIMARY KEY (language_code, variant)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_word_variants_entry ON word_variants(global_dictionary_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_books_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            author TEXT,
            asin TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_sync_index(pool, "books").await
}

async fn create_highlights_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS highlights (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            book_id TEXT,
            text TEXT NOT NULL DEFAULT '',
            note TEXT,
            location TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_sync_index(pool, "highlights").await
}

async fn create_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            type TEXT NOT NULL DEFAULT 'website',
            title TEXT,
            url TEXT,
            domain TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_user_url ON sources(user_id, url)")
        .execute(pool)
        .await?;

    create_sync_index(pool, "sources").await
}

async fn create_vocabulary_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vocabulary (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            word TEXT NOT NULL,
            stem TEXT,
            global_dictionary_id TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One active row per (user, word); tombstones are exempt
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_vocabulary_user_word_active
        ON vocabulary(user_id, word) WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vocabulary_user_entry ON vocabulary(user_id, global_dictionary_id)",
    )
    .execute(pool)
    .await?;

    create_sync_index(pool, "vocabulary").await
}

async fn create_learning_cards_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learning_cards (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            vocabulary_id TEXT NOT NULL,
            state INTEGER NOT NULL DEFAULT 0,
            due TEXT,
            stability REAL NOT NULL DEFAULT 0,
            difficulty REAL NOT NULL DEFAULT 0,
            elapsed_days INTEGER NOT NULL DEFAULT 0,
            scheduled_days INTEGER NOT NULL DEFAULT 0,
            reps INTEGER NOT NULL DEFAULT 0,
            lapses INTEGER NOT NULL DEFAULT 0,
            last_review TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_learning_cards_user_vocab_active
        ON learning_cards(user_id, vocabulary_id) WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    create_sync_index(pool, "learning_cards").await
}

async fn create_encounters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS encounters (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            vocabulary_id TEXT NOT NULL,
            source_id TEXT,
            context TEXT,
            occurred_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_encounters_vocabulary ON encounters(vocabulary_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_encounters_user_created ON encounters(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_review_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            card_id TEXT NOT NULL,
            rating INTEGER NOT NULL,
            state INTEGER NOT NULL DEFAULT 0,
            reviewed_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_review_logs_user_created ON review_logs(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_confusable_sets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS confusable_sets (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            language_code TEXT NOT NULL DEFAULT 'en',
            words TEXT NOT NULL DEFAULT '[]',
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_sync_index(pool, "confusable_sets").await
}

async fn create_confusable_set_members_table(pool: &SqlitePool) -> Result<()> {
    // No user_id: ownership follows the parent set
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS confusable_set_members (
            id TEXT PRIMARY KEY,
            set_id TEXT NOT NULL,
            vocabulary_id TEXT,
            word TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_confusable_set_members_set ON confusable_set_members(set_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_enrichment_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrichment_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            vocabulary_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'done', 'error')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_enrichment_queue_user_vocab
        ON enrichment_queue(user_id, vocabulary_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_enrichment_queue_status ON enrichment_queue(user_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Pull watermark index shared by all versioned sync tables
async fn create_sync_index(pool: &SqlitePool, table: &str) -> Result<()> {
    let sql = format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_user_updated ON {table}(user_id, updated_at)"
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist with default values.
/// NULL values are reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Database contention
    ensure_setting(pool, "database_max_lock_wait_ms", "5000").await?;

    // Enrichment buffer
    ensure_setting(pool, "enrichment_buffer_target", "10").await?;
    ensure_setting(pool, "enrichment_max_attempts", "3").await?;
    ensure_setting(pool, "enrichment_stale_minutes", "5").await?;

    // Sync
    ensure_setting(pool, "sync_pull_overlap_ms", "10000").await?;

    Ok(())
}

/// Ensure a setting exists with a default value
///
/// If the setting doesn't exist, it's created with the default value.
/// If the setting exists but is NULL, it's reset to the default value.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE tolerates concurrent initialization
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let reset = sqlx::query(
        "UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ? AND value IS NULL",
    )
    .bind(default_value)
    .bind(key)
    .execute(pool)
    .await?
    .rows_affected();

    if reset > 0 {
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

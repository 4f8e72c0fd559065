//! Generic row access for the replicated tables
//!
//! Push and pull treat every sync table the same way, so the SQL is built from
//! a static registry. Only column names from the registry are ever interpolated
//! into statements; client values are always bound.

use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;
use vocab_common::time::{format_timestamp, parse_timestamp};
use vocab_common::{Error, Result};

/// How a table participates in replication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Owned by a user, carries `version`/`updated_at`/`deleted_at`
    Versioned,
    /// Owned by a user, immutable once written; pulled by `created_at`
    AppendOnly,
    /// Immutable rows owned through a parent table; pulled by parent id
    ParentScoped,
}

/// Registry entry for one replicated table
#[derive(Debug)]
pub struct SyncTable {
    pub name: &'static str,
    pub kind: TableKind,
    /// Columns a client may write
    pub writable: &'static [&'static str],
    /// Columns the server maintains; pulled but never written by clients
    pub server_columns: &'static [&'static str],
    /// Writable columns holding JSON documents
    pub json_columns: &'static [&'static str],
}

/// Keys a client may never set
pub const SERVER_MANAGED_KEYS: &[&str] = &["user_id", "version", "updated_at", "deleted_at", "global_dictionary_id"];

pub const SYNC_TABLE_REGISTRY: &[SyncTable] = &[
    SyncTable {
        name: "books",
        kind: TableKind::Versioned,
        writable: &["title", "author", "asin"],
        server_columns: &[],
        json_columns: &[],
    },
    SyncTable {
        name: "highlights",
        kind: TableKind::Versioned,
        writable: &["book_id", "text", "note", "location"],
        server_columns: &[],
        json_columns: &[],
    },
    SyncTable {
        name: "sources",
        kind: TableKind::Versioned,
        writable: &["type", "title", "url", "domain"],
        server_columns: &[],
        json_columns: &[],
    },
    SyncTable {
        name: "vocabulary",
        kind: TableKind::Versioned,
        writable: &["word", "stem"],
        server_columns: &["global_dictionary_id"],
        json_columns: &[],
    },
    SyncTable {
        name: "learning_cards",
        kind: TableKind::Versioned,
        writable: &[
            "vocabulary_id",
            "state",
            "due",
            "stability",
            "difficulty",
            "elapsed_days",
            "scheduled_days",
            "reps",
            "lapses",
            "last_review",
        ],
        server_columns: &[],
        json_columns: &[],
    },
    SyncTable {
        name: "encounters",
        kind: TableKind::AppendOnly,
        writable: &["vocabulary_id", "source_id", "context", "occurred_at"],
        server_columns: &[],
        json_columns: &[],
    },
    SyncTable {
        name: "review_logs",
        kind: TableKind::AppendOnly,
        writable: &["card_id", "rating", "state", "reviewed_at"],
        server_columns: &[],
        json_columns: &[],
    },
    SyncTable {
        name: "confusable_sets",
        kind: TableKind::Versioned,
        writable: &["language_code", "words"],
        server_columns: &[],
        json_columns: &["words"],
    },
    SyncTable {
        name: "confusable_set_members",
        kind: TableKind::ParentScoped,
        writable: &["set_id", "vocabulary_id", "word"],
        server_columns: &[],
        json_columns: &[],
    },
];

/// Look up a table in the allow-list
pub fn lookup(name: &str) -> Option<&'static SyncTable> {
    SYNC_TABLE_REGISTRY.iter().find(|table| table.name == name)
}

/// Validated column values taken from a change payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFields {
    pub values: Vec<(&'static str, Value)>,
    /// Normalized client `created_at`, kept for versioned tables only
    pub created_at: Option<String>,
}

impl RowFields {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    /// Replace (or add) a column value
    pub fn set(&mut self, column: &'static str, value: Value) {
        match self.values.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
    }
}

impl SyncTable {
    pub fn is_versioned(&self) -> bool {
        self.kind == TableKind::Versioned
    }

    pub fn is_append_only(&self) -> bool {
        !self.is_versioned()
    }

    fn has_owner_column(&self) -> bool {
        self.kind != TableKind::ParentScoped
    }

    /// Column compared against the pull watermark
    pub fn watermark_column(&self) -> Option<&'static str> {
        match self.kind {
            TableKind::Versioned => Some("updated_at"),
            TableKind::AppendOnly => Some("created_at"),
            TableKind::ParentScoped => None,
        }
    }

    /// Every stored column, in table order
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["id"];
        if self.has_owner_column() {
            columns.push("user_id");
        }
        columns.extend_from_slice(self.writable);
        columns.extend_from_slice(self.server_columns);
        if self.is_versioned() {
            columns.extend_from_slice(&["version", "created_at", "updated_at", "deleted_at"]);
        } else {
            columns.push("created_at");
        }
        columns
    }

    /// Check a payload against the writable column list
    pub fn extract_fields(&self, id: &str, payload: &Map<String, Value>) -> Result<RowFields> {
        let mut fields = RowFields::default();

        for (key, value) in payload {
            if SERVER_MANAGED_KEYS.contains(&key.as_str()) {
                return Err(Error::InvalidInput(format!("{} is managed by the server", key)));
            }

            match key.as_str() {
                "id" => {
                    if value.as_str() != Some(id) {
                        return Err(Error::InvalidInput("payload id does not match change id".into()));
                    }
                }
                "created_at" => {
                    if !self.is_versioned() {
                        continue;
                    }
                    let raw = value
                        .as_str()
                        .ok_or_else(|| Error::InvalidInput("created_at must be a timestamp string".into()))?;
                    fields.created_at = Some(format_timestamp(parse_timestamp(raw)?));
                }
                other => {
                    let column = self
                        .writable
                        .iter()
                        .find(|column| **column == other)
                        .ok_or_else(|| Error::InvalidInput(format!("unknown column {}.{}", self.name, other)))?;

                    if self.json_columns.contains(column) && !(value.is_array() || value.is_object()) {
                        return Err(Error::InvalidInput(format!("{} must be a JSON array or object", column)));
                    }
                    fields.values.push((*column, value.clone()));
                }
            }
        }

        Ok(fields)
    }

    /// `SELECT json_object(...)` over every column; JSON columns are embedded, not quoted
    fn json_select(&self) -> String {
        let pairs: Vec<String> = self
            .columns()
            .into_iter()
            .map(|column| {
                if self.json_columns.contains(&column) {
                    format!("'{column}', json({column})")
                } else {
                    format!("'{column}', {column}")
                }
            })
            .collect();
        format!("SELECT json_object({}) AS row FROM {}", pairs.join(", "), self.name)
    }
}

/// Bind a JSON value with the closest SQLite storage class
pub fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => query.bind(int),
            None => query.bind(number.as_f64()),
        },
        Value::String(text) => query.bind(text.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Whether an insert should overwrite an existing row with the same id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Upsert,
}

/// Insert or upsert a row owned by `user_id`
///
/// Versioned upserts only touch rows of the same owner; a zero return means the
/// id belongs to someone else. Append-only upserts never modify an existing row.
#[allow(clippy::too_many_arguments)]
pub async fn write_row<'e, E>(
    executor: E,
    table: &SyncTable,
    id: &str,
    user_id: Uuid,
    fields: &RowFields,
    now: &str,
    mode: InsertMode,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut columns: Vec<&str> = vec!["id"];
    if table.has_owner_column() {
        columns.push("user_id");
    }
    columns.extend(fields.values.iter().map(|(column, _)| *column));
    if table.is_versioned() {
        columns.extend_from_slice(&["version", "created_at", "updated_at"]);
    } else {
        columns.push("created_at");
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders
    );

    if mode == InsertMode::Upsert {
        if table.is_versioned() {
            let mut assignments: Vec<String> = fields
                .values
                .iter()
                .map(|(column, _)| format!("{column} = excluded.{column}"))
                .collect();
            assignments.push(format!("version = {}.version + 1", table.name));
            assignments.push("updated_at = excluded.updated_at".to_string());
            sql.push_str(&format!(
                " ON CONFLICT(id) DO UPDATE SET {} WHERE {}.user_id = excluded.user_id",
                assignments.join(", "),
                table.name
            ));
        } else {
            sql.push_str(" ON CONFLICT(id) DO NOTHING");
        }
    }

    let mut query = sqlx::query(&sql).bind(id.to_string());
    if table.has_owner_column() {
        query = query.bind(user_id.to_string());
    }
    for (_, value) in &fields.values {
        query = bind_value(query, value);
    }
    if table.is_versioned() {
        let created_at = fields.created_at.clone().unwrap_or_else(|| now.to_string());
        query = query.bind(1_i64).bind(created_at).bind(now.to_string());
    } else {
        query = query.bind(now.to_string());
    }

    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}

/// Compare-and-swap update of a versioned row
///
/// Applies only while the stored version is at most `client_version`; without a
/// client version the update is unconditional. Returns the affected row count.
pub async fn update_row<'e, E>(
    executor: E,
    table: &SyncTable,
    id: &str,
    user_id: Uuid,
    fields: &RowFields,
    client_version: Option<i64>,
    now: &str,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut assignments: Vec<String> = fields
        .values
        .iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect();
    assignments.push("version = version + 1".to_string());
    assignments.push("updated_at = ?".to_string());

    let mut sql = format!(
        "UPDATE {} SET {} WHERE id = ? AND user_id = ?",
        table.name,
        assignments.join(", ")
    );
    if client_version.is_some() {
        sql.push_str(" AND version <= ?");
    }

    let mut query = sqlx::query(&sql);
    for (_, value) in &fields.values {
        query = bind_value(query, value);
    }
    query = query
        .bind(now.to_string())
        .bind(id.to_string())
        .bind(user_id.to_string());
    if let Some(version) = client_version {
        query = query.bind(version);
    }

    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}

/// Tombstone a versioned row; an already deleted row keeps its original `deleted_at`
pub async fn soft_delete_row<'e, E>(executor: E, table: &SyncTable, id: &str, user_id: Uuid, now: &str) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"
        UPDATE {}
        SET deleted_at = COALESCE(deleted_at, ?), version = version + 1, updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
        table.name
    );
    let result = sqlx::query(&sql)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(user_id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Current `(version, updated_at)` of a versioned row owned by `user_id`
pub async fn row_version<'e, E>(executor: E, table: &SyncTable, id: &str, user_id: Uuid) -> Result<Option<(i64, String)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT version, updated_at FROM {} WHERE id = ? AND user_id = ?", table.name);
    let row: Option<(i64, String)> = sqlx::query_as(&sql)
        .bind(id)
        .bind(user_id.to_string())
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// True when the confusable set exists and belongs to `user_id`
pub async fn set_owned_by<'e, E>(executor: E, set_id: &str, user_id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM confusable_sets WHERE id = ? AND user_id = ?")
        .bind(set_id)
        .bind(user_id.to_string())
        .fetch_optional(executor)
        .await?;
    Ok(found.is_some())
}

fn parse_json_row(raw: &str, table: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::Internal(format!("Invalid JSON row from {}: {}", table, e)))
}

/// Rows of a user-owned table changed after `since`
pub async fn fetch_changed(pool: &SqlitePool, table: &SyncTable, user_id: Uuid, since: &str) -> Result<Vec<Value>> {
    let Some(watermark) = table.watermark_column() else {
        return Ok(Vec::new());
    };

    let sql = format!(
        "{} WHERE user_id = ? AND {watermark} > ? ORDER BY {watermark} ASC, id ASC",
        table.json_select()
    );
    let rows: Vec<(String,)> = sqlx::query_as(&sql)
        .bind(user_id.to_string())
        .bind(since)
        .fetch_all(pool)
        .await?;

    rows.iter().map(|(raw,)| parse_json_row(raw, table.name)).collect()
}

/// SQLite caps bound parameters per statement
const PARENT_ID_CHUNK: usize = 500;

/// Rows of a parent-scoped table belonging to any of `parent_ids`
pub async fn fetch_by_parents(
    pool: &SqlitePool,
    table: &SyncTable,
    parent_column: &str,
    parent_ids: &[String],
) -> Result<Vec<Value>> {
    let mut rows = Vec::new();

    for chunk in parent_ids.chunks(PARENT_ID_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "{} WHERE {parent_column} IN ({placeholders}) ORDER BY created_at ASC, id ASC",
            table.json_select()
        );
        let mut query = sqlx::query_as::<_, (String,)>(&sql);
        for id in chunk {
            query = query.bind(id.as_str());
        }
        for (raw,) in query.fetch_all(pool).await? {
            rows.push(parse_json_row(&raw, table.name)?);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use serde_json::json;
    use vocab_common::time::now_timestamp;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_registry_matches_schema_table_list() {
        let names: Vec<&str> = SYNC_TABLE_REGISTRY.iter().map(|t| t.name).collect();
        assert_eq!(names, vocab_common::db::SYNC_TABLES);
        assert!(lookup("api_tokens").is_none());
    }

    #[test]
    fn test_extract_rejects_server_managed_and_unknown_keys() {
        let books = lookup("books").unwrap();
        let id = Uuid::new_v4().to_string();

        let err = books.extract_fields(&id, &payload(json!({"version": 9}))).unwrap_err();
        assert!(err.to_string().contains("managed by the server"));

        let err = books.extract_fields(&id, &payload(json!({"isbn": "x"}))).unwrap_err();
        assert!(err.to_string().contains("unknown column books.isbn"));

        let err = books.extract_fields(&id, &payload(json!({"id": "other"}))).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_extract_normalizes_created_at_for_versioned_only() {
        let id = Uuid::new_v4().to_string();
        let body = payload(json!({"title": "Dune", "created_at": "2026-10-16T10:30:00+02:00"}));

        let fields = lookup("books").unwrap().extract_fields(&id, &body).unwrap();
        assert_eq!(fields.created_at.as_deref(), Some("2026-10-16T08:30:00.000Z"));
        assert_eq!(fields.get("title"), Some(&json!("Dune")));

        let body = payload(json!({"context": "x", "created_at": "2026-10-16T10:30:00+02:00"}));
        let fields = lookup("encounters").unwrap().extract_fields(&id, &body).unwrap();
        assert!(fields.created_at.is_none());
    }

    #[test]
    fn test_json_column_requires_document() {
        let sets = lookup("confusable_sets").unwrap();
        let id = Uuid::new_v4().to_string();
        assert!(sets.extract_fields(&id, &payload(json!({"words": "affect"}))).is_err());
        assert!(sets.extract_fields(&id, &payload(json!({"words": ["affect", "effect"]}))).is_ok());
    }

    #[tokio::test]
    async fn test_cas_update_and_pull_round() {
        let (_dir, pool) = test_pool().await;
        let books = lookup("books").unwrap();
        let user = Uuid::new_v4();
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        let fields = books.extract_fields(&id, &payload(json!({"title": "Dune"}))).unwrap();
        assert_eq!(write_row(&pool, books, &id, user, &fields, &now, InsertMode::Insert).await.unwrap(), 1);

        let fields = books.extract_fields(&id, &payload(json!({"title": "Dune Messiah"}))).unwrap();
        assert_eq!(update_row(&pool, books, &id, user, &fields, Some(1), &now).await.unwrap(), 1);
        // Stored version is now 2; a client still at 1 loses
        assert_eq!(update_row(&pool, books, &id, user, &fields, Some(1), &now).await.unwrap(), 0);
        assert_eq!(row_version(&pool, books, &id, user).await.unwrap().map(|v| v.0), Some(2));

        let rows = fetch_changed(&pool, books, user, "1970-01-01T00:00:00.000Z").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], json!("Dune Messiah"));
        assert_eq!(rows[0]["version"], json!(2));
        assert!(fetch_changed(&pool, books, Uuid::new_v4(), "1970-01-01T00:00:00.000Z")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_versioned_upsert_does_not_cross_owners() {
        let (_dir, pool) = test_pool().await;
        let books = lookup("books").unwrap();
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let fields = books.extract_fields(&id, &payload(json!({"title": "Mine"}))).unwrap();

        write_row(&pool, books, &id, Uuid::new_v4(), &fields, &now, InsertMode::Upsert).await.unwrap();
        let affected = write_row(&pool, books, &id, Uuid::new_v4(), &fields, &now, InsertMode::Upsert)
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn test_json_columns_pull_as_documents() {
        let (_dir, pool) = test_pool().await;
        let sets = lookup("confusable_sets").unwrap();
        let members = lookup("confusable_set_members").unwrap();
        let user = Uuid::new_v4();
        let set_id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        let fields = sets
            .extract_fields(&set_id, &payload(json!({"words": ["affect", "effect"]})))
            .unwrap();
        write_row(&pool, sets, &set_id, user, &fields, &now, InsertMode::Insert).await.unwrap();
        assert!(set_owned_by(&pool, &set_id, user).await.unwrap());
        assert!(!set_owned_by(&pool, &set_id, Uuid::new_v4()).await.unwrap());

        let member_id = Uuid::new_v4().to_string();
        let fields = members
            .extract_fields(&member_id, &payload(json!({"set_id": set_id, "word": "affect"})))
            .unwrap();
        write_row(&pool, members, &member_id, user, &fields, &now, InsertMode::Insert).await.unwrap();

        let rows = fetch_changed(&pool, sets, user, "1970-01-01T00:00:00.000Z").await.unwrap();
        assert_eq!(rows[0]["words"], json!(["affect", "effect"]));

        let rows = fetch_by_parents(&pool, members, "set_id", &[set_id.clone()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["word"], json!("affect"));
        assert!(rows[0].get("user_id").is_none());
    }
}

//! Sync protocol transport types
//!
//! Field names follow the wire protocol used by the clients (camelCase for
//! protocol metadata, snake_case for row columns).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Push operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Insert,
    Upsert,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(SyncOperation::Insert),
            "upsert" => Some(SyncOperation::Upsert),
            "update" => Some(SyncOperation::Update),
            "delete" => Some(SyncOperation::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Insert => "insert",
            SyncOperation::Upsert => "upsert",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

/// One client-side change
///
/// `table` and `operation` stay raw strings so an unknown value rejects only
/// this change, not the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncChange {
    pub table: String,
    pub operation: String,
    pub id: String,
    #[serde(default, alias = "payload")]
    pub data: Map<String, Value>,
    /// Client's last known version (updates only)
    #[serde(default)]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRequest {
    pub changes: Vec<SyncChange>,
}

/// Stale update reported back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub table: String,
    pub server_version: i64,
    pub server_updated_at: String,
}

/// Change refused without aborting the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub table: String,
    pub id: String,
    pub reason: String,
}

/// Client id resolved to a different server row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdRemap {
    pub table: String,
    pub client_id: String,
    pub server_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub applied: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_remaps: Vec<IdRemap>,
    pub synced_at: String,
}

impl PushResponse {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    #[serde(default)]
    pub last_synced_at: Option<String>,
}

/// Rows per table plus the new watermark
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(flatten)]
    pub tables: BTreeMap<String, Vec<Value>>,
    #[serde(rename = "syncedAt")]
    pub synced_at: String,
}

impl PullResponse {
    pub fn rows(&self, table: &str) -> &[Value] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

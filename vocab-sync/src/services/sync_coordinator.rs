//! Push/pull replication
//!
//! **Push** applies a batch of client changes one by one. A bad change is
//! rejected on its own; the rest of the batch still applies. Updates are a
//! compare-and-swap on `version`: a stored version newer than the client's is
//! reported as a conflict and the row is left untouched.
//!
//! **Pull** returns every row of the user's sync tables changed after the
//! client's watermark, plus the canonical dictionary entries the pulled
//! vocabulary rows point at.

use chrono::Duration;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info};
use uuid::Uuid;
use vocab_common::text::normalize;
use vocab_common::time::{epoch, format_timestamp, now_timestamp, parse_timestamp};
use vocab_common::{Error, Result};

use super::identity_resolver::IdentityResolver;
use crate::db::sync_tables::{self, InsertMode, RowFields, SyncTable, TableKind};
use crate::db::{cards, dictionary, settings};
use crate::models::{Conflict, IdRemap, PullResponse, PushResponse, Rejection, SyncChange, SyncOperation};
use crate::utils::retry_on_lock;

const VOCABULARY: &str = "vocabulary";
const LEARNING_CARDS: &str = "learning_cards";
const CONFUSABLE_SETS: &str = "confusable_sets";
const CONFUSABLE_SET_MEMBERS: &str = "confusable_set_members";
const GLOBAL_DICTIONARY: &str = "global_dictionary";

/// Per-change result before it is folded into the response
#[derive(Debug, Clone, PartialEq)]
enum ChangeOutcome {
    Applied {
        remap: Option<IdRemap>,
        /// Vocabulary row left unlinked by this change, to hand to enrichment
        unlinked_vocabulary: Option<Uuid>,
        /// Vocabulary row that needs a card once the batch is done
        needs_card: Option<Uuid>,
    },
    Conflict(Conflict),
    Rejected(String),
}

impl ChangeOutcome {
    fn applied() -> Self {
        ChangeOutcome::Applied {
            remap: None,
            unlinked_vocabulary: None,
            needs_card: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        ChangeOutcome::Rejected(reason.into())
    }
}

/// Validated change, ready to apply
#[derive(Debug, Clone)]
struct PreparedChange {
    table: &'static SyncTable,
    operation: SyncOperation,
    id: String,
    fields: RowFields,
    version: Option<i64>,
}

/// Push response plus the vocabulary rows that still need enrichment
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub response: PushResponse,
    pub new_vocabulary: Vec<Uuid>,
}

/// Client-facing reason for a change that failed validation or hit a constraint
fn rejection_reason(err: &Error) -> Option<String> {
    match err {
        Error::InvalidInput(msg) => Some(msg.clone()),
        Error::NotFound(msg) => Some(format!("not found: {}", msg)),
        err if err.is_unique_violation() => Some("already exists".to_string()),
        _ => None,
    }
}

fn string_field(fields: &RowFields, column: &str) -> Option<String> {
    fields.get(column).and_then(Value::as_str).map(str::to_string)
}

#[derive(Clone)]
pub struct SyncCoordinator {
    db: SqlitePool,
    resolver: IdentityResolver,
}

impl SyncCoordinator {
    pub fn new(db: SqlitePool) -> Self {
        let resolver = IdentityResolver::new(db.clone());
        Self { db, resolver }
    }

    /// Apply a batch of client changes for `user_id`
    pub async fn push(&self, user_id: Uuid, changes: Vec<SyncChange>) -> Result<PushOutcome> {
        let max_wait_ms = settings::get_max_lock_wait_ms(&self.db).await?;

        let mut response = PushResponse::default();
        let mut new_vocabulary = Vec::new();
        let mut needs_card: Vec<Uuid> = Vec::new();
        // Client vocabulary id -> server id, for references later in the batch
        let mut vocabulary_remap: HashMap<String, String> = HashMap::new();

        for change in changes {
            let outcome = match self.prepare(user_id, &change, &vocabulary_remap).await {
                Err(reason) => ChangeOutcome::Rejected(reason),
                Ok(prepared) => {
                    let applied =
                        retry_on_lock("sync push change", max_wait_ms, || self.apply(user_id, &prepared)).await;

                    match applied {
                        Ok(outcome) => outcome,
                        Err(err) => match rejection_reason(&err) {
                            Some(reason) => ChangeOutcome::Rejected(reason),
                            None => {
                                error!(
                                    user_id = %user_id,
                                    table = %change.table,
                                    operation = %change.operation,
                                    id = %change.id,
                                    error = %err,
                                    "Sync change failed"
                                );
                                ChangeOutcome::rejected("storage error")
                            }
                        },
                    }
                }
            };

            match outcome {
                ChangeOutcome::Applied {
                    remap,
                    unlinked_vocabulary,
                    needs_card: card_for,
                } => {
                    response.applied += 1;
                    if let Some(remap) = remap {
                        if remap.table == VOCABULARY {
                            vocabulary_remap.insert(remap.client_id.clone(), remap.server_id.clone());
                        }
                        response.id_remaps.push(remap);
                    }
                    new_vocabulary.extend(unlinked_vocabulary);
                    needs_card.extend(card_for);
                }
                ChangeOutcome::Conflict(conflict) => {
                    debug!(
                        user_id = %user_id,
                        table = %conflict.table,
                        id = %conflict.id,
                        server_version = conflict.server_version,
                        "Stale update"
                    );
                    response.conflicts.push(conflict);
                }
                ChangeOutcome::Rejected(reason) => {
                    debug!(user_id = %user_id, table = %change.table, id = %change.id, reason = %reason, "Change rejected");
                    response.rejected.push(Rejection {
                        table: change.table.clone(),
                        id: change.id.clone(),
                        reason,
                    });
                }
            }
        }

        // Cards last, so a card pushed in the same batch is kept instead of a fresh one
        for vocabulary_id in needs_card {
            if let Err(err) = self.resolver.ensure_card(user_id, vocabulary_id).await {
                error!(user_id = %user_id, vocabulary_id = %vocabulary_id, error = %err, "Ensure learning card failed");
            }
        }
        // Also repairs cards a client tombstoned while their vocabulary row stayed active
        if let Err(err) = self.resolver.backfill_cards(user_id).await {
            error!(user_id = %user_id, error = %err, "Learning card backfill failed");
        }

        response.synced_at = now_timestamp();
        info!(
            user_id = %user_id,
            applied = response.applied,
            conflicts = response.conflicts.len(),
            rejected = response.rejected.len(),
            id_remaps = response.id_remaps.len(),
            "Push processed"
        );

        Ok(PushOutcome {
            response,
            new_vocabulary,
        })
    }

    /// Validate a change and rewrite references to remapped vocabulary ids
    ///
    /// `Err` carries the rejection reason.
    async fn prepare(
        &self,
        user_id: Uuid,
        change: &SyncChange,
        vocabulary_remap: &HashMap<String, String>,
    ) -> std::result::Result<PreparedChange, String> {
        let table = sync_tables::lookup(&change.table).ok_or_else(|| format!("unknown table {}", change.table))?;
        let operation =
            SyncOperation::parse(&change.operation).ok_or_else(|| format!("unknown operation {}", change.operation))?;

        let client_id = Uuid::parse_str(change.id.trim())
            .map_err(|_| "id must be a UUID".to_string())?
            .to_string();

        if table.is_append_only() && matches!(operation, SyncOperation::Update | SyncOperation::Delete) {
            return Err(format!("{} is append-only", table.name));
        }

        // Updates and deletes of a row remapped earlier in the batch target the server row
        let id = if table.name == VOCABULARY {
            vocabulary_remap.get(&client_id).cloned().unwrap_or(client_id)
        } else {
            client_id
        };

        let mut fields = if operation == SyncOperation::Delete {
            RowFields::default()
        } else {
            table.extract_fields(change.id.trim(), &change.data).map_err(|err| match err {
                Error::InvalidInput(msg) => msg,
                other => other.to_string(),
            })?
        };

        if let Some(vocabulary_id) = string_field(&fields, "vocabulary_id") {
            if let Some(server_id) = vocabulary_remap.get(&vocabulary_id) {
                fields.set("vocabulary_id", Value::String(server_id.clone()));
            }
        }

        if table.name == VOCABULARY && fields.get("word").is_some() {
            let word = string_field(&fields, "word")
                .map(|w| normalize(&w))
                .filter(|w| !w.is_empty())
                .ok_or_else(|| "word must be a non-empty string".to_string())?;
            fields.set("word", Value::String(word));
        }

        if table.kind == TableKind::ParentScoped {
            let set_id = string_field(&fields, "set_id").ok_or_else(|| "set_id is required".to_string())?;
            let owned = sync_tables::set_owned_by(&self.db, &set_id, user_id)
                .await
                .map_err(|e| e.to_string())?;
            if !owned {
                return Err(format!("{} {} not found", CONFUSABLE_SETS, set_id));
            }
        }

        Ok(PreparedChange {
            table,
            operation,
            id,
            fields,
            version: change.version,
        })
    }

    async fn apply(&self, user_id: Uuid, change: &PreparedChange) -> Result<ChangeOutcome> {
        let now = now_timestamp();
        let PreparedChange {
            table,
            operation,
            id,
            fields,
            version,
        } = change;
        let (table, operation, version) = (*table, *operation, *version);

        match operation {
            SyncOperation::Insert | SyncOperation::Upsert if table.name == VOCABULARY => {
                self.write_vocabulary(user_id, id, fields, operation, &now).await
            }
            SyncOperation::Insert | SyncOperation::Upsert => {
                let mode = if operation == SyncOperation::Upsert {
                    InsertMode::Upsert
                } else {
                    InsertMode::Insert
                };
                self.write_generic(user_id, table, id, fields, mode, &now).await
            }
            SyncOperation::Update => self.update(user_id, table, id, fields, version, &now).await,
            SyncOperation::Delete => self.delete(user_id, table, id, &now).await,
        }
    }

    /// Vocabulary creation goes through identity resolution
    async fn write_vocabulary(
        &self,
        user_id: Uuid,
        id: &str,
        fields: &RowFields,
        operation: SyncOperation,
        now: &str,
    ) -> Result<ChangeOutcome> {
        let table = sync_tables::lookup(VOCABULARY).ok_or_else(|| Error::Internal("vocabulary not registered".into()))?;
        let word = string_field(fields, "word").ok_or_else(|| Error::InvalidInput("word is required".into()))?;

        // Upsert of a row the user already owns is a plain write
        if operation == SyncOperation::Upsert && sync_tables::row_version(&self.db, table, id, user_id).await?.is_some() {
            sync_tables::write_row(&self.db, table, id, user_id, fields, now, InsertMode::Upsert).await?;
            return Ok(ChangeOutcome::applied());
        }

        let client_id = Uuid::parse_str(id).map_err(|_| Error::InvalidInput("id must be a UUID".into()))?;
        let resolved = self.resolver.resolve_with_id(user_id, &word, Some(client_id), None).await?;

        let remap = (resolved.vocabulary_id != client_id).then(|| IdRemap {
            table: VOCABULARY.to_string(),
            client_id: client_id.to_string(),
            server_id: resolved.vocabulary_id.to_string(),
        });
        if let Some(remap) = &remap {
            info!(
                user_id = %user_id,
                client_id = %remap.client_id,
                server_id = %remap.server_id,
                word = %word,
                "Vocabulary id remapped to existing row"
            );
        }

        Ok(ChangeOutcome::Applied {
            remap,
            unlinked_vocabulary: resolved.needs_enrichment.then_some(resolved.vocabulary_id),
            needs_card: Some(resolved.vocabulary_id),
        })
    }

    async fn write_generic(
        &self,
        user_id: Uuid,
        table: &'static SyncTable,
        id: &str,
        fields: &RowFields,
        mode: InsertMode,
        now: &str,
    ) -> Result<ChangeOutcome> {
        match sync_tables::write_row(&self.db, table, id, user_id, fields, now, mode).await {
            Ok(0) if table.is_versioned() => Ok(ChangeOutcome::rejected("id belongs to another row owner")),
            Ok(_) => Ok(ChangeOutcome::applied()),
            Err(err) if err.is_unique_violation() && table.name == LEARNING_CARDS => {
                self.remap_card(user_id, id, fields, err).await
            }
            Err(err) => Err(err),
        }
    }

    /// A second card for the same vocabulary row resolves to the active one
    async fn remap_card(&self, user_id: Uuid, id: &str, fields: &RowFields, err: Error) -> Result<ChangeOutcome> {
        let vocabulary_id = string_field(fields, "vocabulary_id").and_then(|v| Uuid::parse_str(&v).ok());
        let existing = match vocabulary_id {
            Some(vocabulary_id) => cards::find_active_card(&self.db, user_id, vocabulary_id).await?,
            None => None,
        };

        match existing {
            Some(card_id) if card_id.to_string() != id => Ok(ChangeOutcome::Applied {
                remap: Some(IdRemap {
                    table: LEARNING_CARDS.to_string(),
                    client_id: id.to_string(),
                    server_id: card_id.to_string(),
                }),
                unlinked_vocabulary: None,
                needs_card: None,
            }),
            _ => Err(err),
        }
    }

    async fn update(
        &self,
        user_id: Uuid,
        table: &'static SyncTable,
        id: &str,
        fields: &RowFields,
        client_version: Option<i64>,
        now: &str,
    ) -> Result<ChangeOutcome> {
        let mut tx = self.db.begin().await?;

        let affected = sync_tables::update_row(&mut *tx, table, id, user_id, fields, client_version, now).await?;
        if affected == 1 {
            tx.commit().await?;
            return Ok(ChangeOutcome::applied());
        }

        let current = sync_tables::row_version(&mut *tx, table, id, user_id).await?;
        tx.rollback().await?;

        Ok(match current {
            None => ChangeOutcome::rejected("not found"),
            Some((server_version, server_updated_at)) => ChangeOutcome::Conflict(Conflict {
                id: id.to_string(),
                table: table.name.to_string(),
                server_version,
                server_updated_at,
            }),
        })
    }

    async fn delete(&self, user_id: Uuid, table: &'static SyncTable, id: &str, now: &str) -> Result<ChangeOutcome> {
        let mut tx = self.db.begin().await?;

        let affected = sync_tables::soft_delete_row(&mut *tx, table, id, user_id, now).await?;
        if affected == 0 {
            tx.rollback().await?;
            return Ok(ChangeOutcome::rejected("not found"));
        }

        if table.name == VOCABULARY {
            if let Ok(vocabulary_id) = Uuid::parse_str(id) {
                cards::soft_delete_for_vocabulary(&mut *tx, user_id, vocabulary_id).await?;
            }
        }

        tx.commit().await?;
        Ok(ChangeOutcome::applied())
    }

    /// Rows changed after `last_synced_at` (everything when absent)
    pub async fn pull(&self, user_id: Uuid, last_synced_at: Option<&str>) -> Result<PullResponse> {
        // Writes stamp `updated_at` before they commit; the overlap re-sends rows
        // that committed after the previous pull had already read
        let since = match last_synced_at.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                let overlap_ms = settings::get_pull_overlap_ms(&self.db).await?;
                let since = parse_timestamp(raw)?
                    .checked_sub_signed(Duration::milliseconds(overlap_ms.max(0)))
                    .unwrap_or_else(epoch);
                format_timestamp(since)
            }
            None => format_timestamp(epoch()),
        };

        // Taken before reading so concurrent writes show up again next time
        let mut response = PullResponse {
            synced_at: now_timestamp(),
            ..Default::default()
        };

        for table in sync_tables::SYNC_TABLE_REGISTRY {
            if table.kind == TableKind::ParentScoped {
                continue;
            }
            let rows = sync_tables::fetch_changed(&self.db, table, user_id, &since).await?;
            response.tables.insert(table.name.to_string(), rows);
        }

        let set_ids: Vec<String> = response
            .rows(CONFUSABLE_SETS)
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        let members_table = sync_tables::lookup(CONFUSABLE_SET_MEMBERS)
            .ok_or_else(|| Error::Internal("confusable_set_members not registered".into()))?;
        let members = sync_tables::fetch_by_parents(&self.db, members_table, "set_id", &set_ids).await?;
        response.tables.insert(CONFUSABLE_SET_MEMBERS.to_string(), members);

        let entry_ids: BTreeSet<Uuid> = response
            .rows(VOCABULARY)
            .iter()
            .filter_map(|row| row.get("global_dictionary_id").and_then(Value::as_str))
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect();
        let entry_ids: Vec<Uuid> = entry_ids.into_iter().collect();
        let entries = dictionary::load_entries_json(&self.db, &entry_ids).await?;
        response.tables.insert(GLOBAL_DICTIONARY.to_string(), entries);

        debug!(
            user_id = %user_id,
            since = %since,
            vocabulary = response.rows(VOCABULARY).len(),
            cards = response.rows(LEARNING_CARDS).len(),
            "Pull served"
        );

        Ok(response)
    }
}

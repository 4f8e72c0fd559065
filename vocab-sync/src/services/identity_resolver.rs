//! Vocabulary identity resolution
//!
//! Establishes the single active vocabulary row for a (user, word) pair:
//! an existing active row wins, then the oldest tombstone is reactivated, then
//! a new row is inserted. The partial unique index settles concurrent callers;
//! the loser of an insert race re-reads the winner instead of failing.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vocab_common::text::normalize;
use vocab_common::{Error, Result};

use crate::db::{cards, queue, settings, vocabulary};
use crate::models::{InsertOutcome, ResolvedVocabulary};
use crate::utils::retry_on_lock;

/// Outcome of a learning card backfill
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardBackfill {
    /// Rows that got a card
    pub processed: usize,
    /// Rows whose card could not be created
    pub skipped: usize,
    pub total_vocabulary: i64,
}

#[derive(Clone)]
pub struct IdentityResolver {
    db: SqlitePool,
}

impl IdentityResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Resolve `raw_word` for `user_id`, optionally attaching a canonical entry
    pub async fn resolve(
        &self,
        user_id: Uuid,
        raw_word: &str,
        canonical_entry_id: Option<Uuid>,
    ) -> Result<ResolvedVocabulary> {
        self.resolve_with_id(user_id, raw_word, None, canonical_entry_id).await
    }

    /// Resolve with a client-proposed id for the row created on a miss
    ///
    /// The returned id differs from `proposed_id` whenever an active row or a
    /// tombstone already exists for the word.
    pub async fn resolve_with_id(
        &self,
        user_id: Uuid,
        raw_word: &str,
        proposed_id: Option<Uuid>,
        canonical_entry_id: Option<Uuid>,
    ) -> Result<ResolvedVocabulary> {
        let word = normalize(raw_word);
        if word.is_empty() {
            return Err(Error::InvalidInput("word must not be empty".into()));
        }

        let max_wait_ms = settings::get_max_lock_wait_ms(&self.db).await?;
        retry_on_lock("resolve vocabulary", max_wait_ms, || {
            self.resolve_once(user_id, &word, proposed_id, canonical_entry_id)
        })
        .await
    }

    async fn resolve_once(
        &self,
        user_id: Uuid,
        word: &str,
        proposed_id: Option<Uuid>,
        canonical_entry_id: Option<Uuid>,
    ) -> Result<ResolvedVocabulary> {
        if let Some(existing) = vocabulary::find_active_by_word(&self.db, user_id, word).await? {
            self.attach_canonical(existing, canonical_entry_id).await?;
            return Ok(ResolvedVocabulary {
                vocabulary_id: existing,
                is_new: false,
                needs_enrichment: false,
            });
        }

        if let Some(tombstone) = vocabulary::find_oldest_tombstone(&self.db, user_id, word).await? {
            match vocabulary::reactivate(&self.db, tombstone, canonical_entry_id).await {
                Ok(true) => {
                    info!(user_id = %user_id, vocabulary_id = %tombstone, word = %word, "Reactivated vocabulary");
                    let needs_enrichment = self.requeue_if_unlinked(user_id, tombstone).await?;
                    return Ok(ResolvedVocabulary {
                        vocabulary_id: tombstone,
                        is_new: false,
                        needs_enrichment,
                    });
                }
                // Someone else reactivated it or created an active row first
                Ok(false) => {}
                Err(err) if err.is_unique_violation() => {}
                Err(err) => return Err(err),
            }
        }

        let id = proposed_id.unwrap_or_else(Uuid::new_v4);
        match vocabulary::insert_active(&self.db, id, user_id, word, canonical_entry_id).await? {
            InsertOutcome::Created(id) => {
                debug!(user_id = %user_id, vocabulary_id = %id, word = %word, "Created vocabulary");
                Ok(ResolvedVocabulary {
                    vocabulary_id: id,
                    is_new: true,
                    needs_enrichment: canonical_entry_id.is_none(),
                })
            }
            InsertOutcome::AlreadyExists(existing) => {
                info!(user_id = %user_id, vocabulary_id = %existing, word = %word, "Lost vocabulary insert race, using winner");
                self.attach_canonical(existing, canonical_entry_id).await?;
                Ok(ResolvedVocabulary {
                    vocabulary_id: existing,
                    is_new: false,
                    needs_enrichment: false,
                })
            }
        }
    }

    /// A merge clears the link of the row it tombstones and leaves its queue
    /// item `done`; bring such a row back into the enrichment queue.
    async fn requeue_if_unlinked(&self, user_id: Uuid, vocabulary_id: Uuid) -> Result<bool> {
        let linked = vocabulary::load_vocabulary(&self.db, vocabulary_id)
            .await?
            .and_then(|row| row.global_dictionary_id)
            .is_some();
        if linked {
            return Ok(false);
        }

        queue::requeue(&self.db, user_id, vocabulary_id).await?;
        debug!(user_id = %user_id, vocabulary_id = %vocabulary_id, "Reactivated row queued for enrichment");
        Ok(true)
    }

    async fn attach_canonical(&self, vocabulary_id: Uuid, canonical_entry_id: Option<Uuid>) -> Result<()> {
        let Some(entry_id) = canonical_entry_id else {
            return Ok(());
        };

        let current = vocabulary::load_vocabulary(&self.db, vocabulary_id).await?;
        if current.and_then(|row| row.global_dictionary_id) != Some(entry_id) {
            vocabulary::link_entry(&self.db, vocabulary_id, entry_id, None).await?;
        }
        Ok(())
    }

    /// Make sure the vocabulary row has an active learning card
    pub async fn ensure_card(&self, user_id: Uuid, vocabulary_id: Uuid) -> Result<Uuid> {
        let max_wait_ms = settings::get_max_lock_wait_ms(&self.db).await?;
        let outcome = retry_on_lock("ensure learning card", max_wait_ms, || {
            cards::ensure_card(&self.db, user_id, vocabulary_id)
        })
        .await?;
        Ok(outcome.id())
    }

    /// Give every active vocabulary row of the user an active card
    ///
    /// Covers rows whose card was tombstoned by a client while the row
    /// itself stayed active. Failures are logged per row and counted.
    pub async fn backfill_cards(&self, user_id: Uuid) -> Result<CardBackfill> {
        let missing = cards::missing_for_user(&self.db, user_id).await?;
        let (enriched, unenriched) = vocabulary::count_by_enrichment(&self.db, user_id).await?;
        let mut report = CardBackfill {
            total_vocabulary: enriched + unenriched,
            ..Default::default()
        };

        for vocabulary_id in missing {
            match self.ensure_card(user_id, vocabulary_id).await {
                Ok(_) => report.processed += 1,
                Err(err) => {
                    warn!(user_id = %user_id, vocabulary_id = %vocabulary_id, error = %err, "Card backfill failed");
                    report.skipped += 1;
                }
            }
        }

        if report.processed > 0 {
            info!(user_id = %user_id, processed = report.processed, "Backfilled learning cards");
        }
        Ok(report)
    }
}

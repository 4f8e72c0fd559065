//! Duplicate vocabulary merge
//!
//! Two surface forms of one lemma ("ran", "run") end up linked to the same
//! canonical entry after enrichment. The oldest active row is kept; every other
//! row has its encounters moved to the keeper, loses its canonical link and is
//! tombstoned together with its card. Each duplicate is collapsed in its own
//! transaction, so a failure leaves already merged rows merged.

use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;
use vocab_common::Result;

use crate::db::{cards, encounters, settings, vocabulary};
use crate::utils::retry_on_lock;

/// What a merge pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Surviving row, if the entry has any active rows for the user
    pub keeper: Option<Uuid>,
    /// Rows tombstoned into the keeper
    pub merged: Vec<Uuid>,
    pub encounters_moved: u64,
}

#[derive(Clone)]
pub struct MergeEngine {
    db: SqlitePool,
}

impl MergeEngine {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Collapse all active rows of `user_id` linked to `entry_id` into the oldest
    ///
    /// Idempotent: a second call finds a single row and changes nothing.
    pub async fn merge_if_duplicate(&self, user_id: Uuid, entry_id: Uuid) -> Result<MergeReport> {
        let ids = vocabulary::active_ids_for_entry(&self.db, user_id, entry_id).await?;
        let Some((&keeper, duplicates)) = ids.split_first() else {
            return Ok(MergeReport::default());
        };

        let mut report = MergeReport {
            keeper: Some(keeper),
            ..Default::default()
        };
        if duplicates.is_empty() {
            return Ok(report);
        }

        let max_wait_ms = settings::get_max_lock_wait_ms(&self.db).await?;
        for &duplicate in duplicates {
            let moved = retry_on_lock("merge duplicate vocabulary", max_wait_ms, || {
                self.collapse(user_id, keeper, duplicate)
            })
            .await?;

            info!(
                user_id = %user_id,
                keeper = %keeper,
                duplicate = %duplicate,
                entry_id = %entry_id,
                encounters_moved = moved,
                "Merged duplicate vocabulary"
            );
            report.merged.push(duplicate);
            report.encounters_moved += moved;
        }

        Ok(report)
    }

    async fn collapse(&self, user_id: Uuid, keeper: Uuid, duplicate: Uuid) -> Result<u64> {
        let mut tx = self.db.begin().await?;

        let moved = encounters::relocate(&mut *tx, duplicate, keeper).await?;
        // Unlink before tombstoning so the row never counts as an active duplicate again
        vocabulary::clear_entry_link(&mut *tx, duplicate).await?;
        vocabulary::soft_delete(&mut *tx, duplicate).await?;
        cards::soft_delete_for_vocabulary(&mut *tx, user_id, duplicate).await?;

        tx.commit().await?;
        Ok(moved)
    }
}

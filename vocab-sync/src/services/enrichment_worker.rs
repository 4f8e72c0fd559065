//! Enrichment queue worker and buffer replenishment
//!
//! Each vocabulary row goes through the queue: claim, enrich, link, merge,
//! done. A failed attempt is recorded and the item becomes claimable again
//! until the attempt limit turns it into `error`. A forced pass re-enriches
//! linked rows and gives `done` or `error` items a fresh attempt budget.
//!
//! Capture paths hand work to the worker through `EnrichmentTrigger` and never
//! wait for it.

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vocab_common::Result;

use super::enrichment_pipeline::EnrichmentPipeline;
use super::merge_engine::MergeEngine;
use crate::db::queue::QueueStatus;
use crate::db::{encounters, queue, settings, vocabulary};
use crate::models::{DictionaryEntry, VocabularyRow};

/// Words processed per request when the caller does not say
pub const DEFAULT_BATCH_SIZE: usize = 5;
/// Upper bound for a single request
pub const MAX_BATCH_SIZE: usize = 10;

const TRIGGER_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedWord {
    pub vocabulary_id: Uuid,
    pub word: String,
    pub global_dictionary_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedWord {
    pub vocabulary_id: Uuid,
    pub error: String,
    pub will_retry: bool,
}

/// Result of a processing pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessSummary {
    pub enriched: Vec<EnrichedWord>,
    pub failed: Vec<FailedWord>,
    pub skipped: Vec<Uuid>,
}

/// How many enriched words a user has ready
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferStatus {
    pub enriched_count: i64,
    pub un_enriched_count: i64,
    pub buffer_target: i64,
    pub pending_in_queue: i64,
    /// Un-enriched rows that reached the attempt limit
    pub error_count: i64,
    pub needs_replenishment: bool,
}

#[derive(Clone)]
pub struct EnrichmentWorker {
    db: SqlitePool,
    pipeline: EnrichmentPipeline,
    merge: MergeEngine,
}

impl EnrichmentWorker {
    pub fn new(db: SqlitePool, pipeline: EnrichmentPipeline) -> Self {
        let merge = MergeEngine::new(db.clone());
        Self { db, pipeline, merge }
    }

    pub fn pipeline(&self) -> &EnrichmentPipeline {
        &self.pipeline
    }

    /// Enrich the given active rows of `user_id`, at most `batch_size` of them
    pub async fn process_ids(
        &self,
        user_id: Uuid,
        vocabulary_ids: &[Uuid],
        native_language: &str,
        batch_size: usize,
        force_re_enrich: bool,
    ) -> Result<ProcessSummary> {
        self.reset_stale().await?;
        let limit = batch_size.clamp(1, MAX_BATCH_SIZE);
        let ids: Vec<Uuid> = vocabulary_ids.iter().take(limit).copied().collect();
        let rows = vocabulary::load_active_many(&self.db, user_id, &ids).await?;
        self.process_words(user_id, &rows, native_language, force_re_enrich).await
    }

    async fn reset_stale(&self) -> Result<()> {
        let stale_minutes = settings::get_stale_minutes(&self.db).await?;
        queue::reset_stale(&self.db, stale_minutes).await?;
        Ok(())
    }

    async fn process_words(
        &self,
        user_id: Uuid,
        rows: &[VocabularyRow],
        native_language: &str,
        force_re_enrich: bool,
    ) -> Result<ProcessSummary> {
        let max_attempts = settings::get_max_attempts(&self.db).await?;

        let mut summary = ProcessSummary::default();

        for row in rows {
            if force_re_enrich {
                queue::requeue(&self.db, user_id, row.id).await?;
            } else if row.global_dictionary_id.is_some() {
                queue::mark_done(&self.db, user_id, row.id).await?;
                summary.skipped.push(row.id);
                continue;
            }

            if !queue::claim(&self.db, user_id, row.id).await? {
                debug!(vocabulary_id = %row.id, "Queue item not claimable, skipping");
                summary.skipped.push(row.id);
                continue;
            }

            match self.enrich_row(user_id, row, native_language, force_re_enrich).await {
                Ok(entry) => {
                    queue::mark_done(&self.db, user_id, row.id).await?;
                    info!(
                        user_id = %user_id,
                        vocabulary_id = %row.id,
                        word = %row.word,
                        entry_id = %entry.id,
                        "Enriched vocabulary"
                    );
                    summary.enriched.push(EnrichedWord {
                        vocabulary_id: row.id,
                        word: row.word.clone(),
                        global_dictionary_id: entry.id,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    let status = queue::record_failure(&self.db, user_id, row.id, &message, max_attempts).await?;
                    warn!(
                        user_id = %user_id,
                        vocabulary_id = %row.id,
                        word = %row.word,
                        error = %message,
                        status = status.as_str(),
                        "Enrichment attempt failed"
                    );
                    summary.failed.push(FailedWord {
                        vocabulary_id: row.id,
                        error: message,
                        will_retry: status == QueueStatus::Pending,
                    });
                }
            }
        }

        Ok(summary)
    }

    async fn enrich_row(
        &self,
        user_id: Uuid,
        row: &VocabularyRow,
        native_language: &str,
        force_re_enrich: bool,
    ) -> Result<DictionaryEntry> {
        let context = encounters::latest_context(&self.db, user_id, row.id).await?;
        let entry = if force_re_enrich {
            self.pipeline
                .re_enrich(&row.word, native_language, context.as_deref())
                .await?
        } else {
            self.pipeline
                .enrich(&row.word, native_language, context.as_deref())
                .await?
        };

        vocabulary::link_entry(&self.db, row.id, entry.id, Some(&entry.lemma)).await?;

        // A failed merge leaves duplicates for the next pass; the link itself stands
        if let Err(err) = self.merge.merge_if_duplicate(user_id, entry.id).await {
            error!(user_id = %user_id, entry_id = %entry.id, error = %err, "Duplicate merge failed");
        }

        Ok(entry)
    }

    pub async fn buffer_status(&self, user_id: Uuid) -> Result<BufferStatus> {
        let (enriched_count, un_enriched_count) = vocabulary::count_by_enrichment(&self.db, user_id).await?;
        let buffer_target = settings::get_buffer_target(&self.db).await?;
        let pending_in_queue = queue::count_pending(&self.db, user_id).await?;
        let error_count = queue::count_errors(&self.db, user_id).await?;

        Ok(BufferStatus {
            enriched_count,
            un_enriched_count,
            buffer_target,
            pending_in_queue,
            error_count,
            needs_replenishment: enriched_count < buffer_target,
        })
    }

    /// Enrich the user's oldest un-enriched rows, at most `batch_size` of them
    ///
    /// Rows that gave up or are in flight are passed over so newer words still
    /// make progress; a forced pass retries the ones that gave up.
    pub async fn process_unenriched(
        &self,
        user_id: Uuid,
        native_language: &str,
        batch_size: usize,
        force_re_enrich: bool,
    ) -> Result<ProcessSummary> {
        self.reset_stale().await?;
        let limit = batch_size.clamp(1, MAX_BATCH_SIZE);
        let rows = vocabulary::list_unenriched(&self.db, user_id, limit as i64, force_re_enrich).await?;
        self.process_words(user_id, &rows, native_language, force_re_enrich).await
    }
}

/// Work item sent to the background worker
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentJob {
    pub user_id: Uuid,
    pub vocabulary_ids: Vec<Uuid>,
    pub native_language: String,
}

/// Fire-and-forget handle to the background worker
#[derive(Clone)]
pub struct EnrichmentTrigger {
    sender: mpsc::Sender<EnrichmentJob>,
}

impl EnrichmentTrigger {
    /// Spawn the background task that owns the worker
    pub fn spawn(worker: EnrichmentWorker) -> Self {
        let (trigger, receiver) = Self::channel();
        tokio::spawn(run_worker(worker, receiver));
        trigger
    }

    /// Trigger plus the receiving end, for callers that drive the jobs themselves
    pub fn channel() -> (Self, mpsc::Receiver<EnrichmentJob>) {
        let (sender, receiver) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        (Self { sender }, receiver)
    }

    /// Queue enrichment for the given rows without waiting
    pub fn request(&self, user_id: Uuid, vocabulary_ids: Vec<Uuid>, native_language: &str) {
        if vocabulary_ids.is_empty() {
            return;
        }

        let count = vocabulary_ids.len();
        let job = EnrichmentJob {
            user_id,
            vocabulary_ids,
            native_language: native_language.to_string(),
        };

        match self.sender.try_send(job) {
            Ok(()) => debug!(user_id = %user_id, count, "Enrichment requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %user_id, count, "Enrichment queue full, request dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(user_id = %user_id, count, "Enrichment worker stopped, request dropped");
            }
        }
    }
}

async fn run_worker(worker: EnrichmentWorker, mut receiver: mpsc::Receiver<EnrichmentJob>) {
    info!("Enrichment worker started");

    while let Some(job) = receiver.recv().await {
        for chunk in job.vocabulary_ids.chunks(MAX_BATCH_SIZE) {
            match worker
                .process_ids(job.user_id, chunk, &job.native_language, MAX_BATCH_SIZE, false)
                .await
            {
                Ok(summary) => info!(
                    user_id = %job.user_id,
                    enriched = summary.enriched.len(),
                    failed = summary.failed.len(),
                    skipped = summary.skipped.len(),
                    "Background enrichment finished"
                ),
                Err(err) => error!(user_id = %job.user_id, error = %err, "Background enrichment failed"),
            }
        }
    }

    info!("Enrichment worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_ignores_empty_requests() {
        let (trigger, mut receiver) = EnrichmentTrigger::channel();
        trigger.request(Uuid::new_v4(), vec![], "de");

        let user = Uuid::new_v4();
        let id = Uuid::new_v4();
        trigger.request(user, vec![id], "de");

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.user_id, user);
        assert_eq!(job.vocabulary_ids, vec![id]);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_after_worker_stop_does_not_panic() {
        let (trigger, receiver) = EnrichmentTrigger::channel();
        drop(receiver);
        trigger.request(Uuid::new_v4(), vec![Uuid::new_v4()], "de");
    }
}

//! Enrichment pipeline and worker with mock providers

mod support;

use std::sync::Arc;
use uuid::Uuid;
use vocab_common::Error;
use vocab_sync::db::{dictionary, encounters, queue, vocabulary};
use vocab_sync::models::{TranslationSource, ENRICHMENT_VERSION};
use vocab_sync::services::{EnrichmentWorker, IdentityResolver, TranslationChain};

use support::MockEnricher;

#[tokio::test]
async fn new_word_creates_entry_and_variants() {
    let (_dir, pool) = support::test_db().await;
    let enricher = Arc::new(MockEnricher::new(&[("ran", "run")]));
    let pipeline = support::pipeline(&pool, support::translator(&[("run", "laufen")]), Some(enricher.clone()));

    let entry = pipeline.enrich("Ran", "de", Some("She ran home.")).await.unwrap();
    assert_eq!(entry.lemma, "run");
    assert_eq!(entry.part_of_speech.as_deref(), Some("verb"));
    // Translation is requested for the captured form, which the mock does not know
    assert_eq!(entry.translation_for("de").unwrap().source, TranslationSource::None);

    let by_variant = dictionary::find_by_variant(&pool, "en", "ran").await.unwrap().unwrap();
    let by_lemma_variant = dictionary::find_by_variant(&pool, "en", "run").await.unwrap().unwrap();
    assert_eq!(by_variant.id, entry.id);
    assert_eq!(by_lemma_variant.id, entry.id);
    assert_eq!(enricher.call_count(), 1);
}

#[tokio::test]
async fn known_lemma_and_variant_skip_the_ai_step() {
    let (_dir, pool) = support::test_db().await;
    let enricher = Arc::new(MockEnricher::new(&[("ran", "run")]));
    let pipeline = support::pipeline(&pool, support::translator(&[("run", "laufen")]), Some(enricher.clone()));

    let first = pipeline.enrich("run", "de", None).await.unwrap();
    assert_eq!(first.translation_for("de").unwrap().primary, "laufen");
    assert_eq!(enricher.call_count(), 1);

    let again = pipeline.enrich("run", "de", None).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(enricher.call_count(), 1);

    // A new surface form of a known lemma reuses the entry
    let ran = pipeline.enrich("ran", "de", None).await.unwrap();
    assert_eq!(ran.id, first.id);
    assert_eq!(enricher.call_count(), 2);

    let cached = pipeline.enrich("ran", "de", None).await.unwrap();
    assert_eq!(cached.id, first.id);
    assert_eq!(enricher.call_count(), 2);
}

#[tokio::test]
async fn cached_entry_is_upgraded_with_new_language() {
    let (_dir, pool) = support::test_db().await;
    let enricher = Arc::new(MockEnricher::new(&[]));
    let chain = support::translator(&[("run:de", "laufen"), ("run:fr", "courir")]);
    let pipeline = support::pipeline(&pool, chain, Some(enricher.clone()));

    let german = pipeline.enrich("run", "de", None).await.unwrap();
    let french = pipeline.enrich("run", "fr", None).await.unwrap();

    assert_eq!(french.id, german.id);
    assert_eq!(french.translation_for("de").unwrap().primary, "laufen");
    assert_eq!(french.translation_for("fr").unwrap().primary, "courir");
    assert_eq!(enricher.call_count(), 1);
}

#[tokio::test]
async fn missing_enricher_is_a_config_error() {
    let (_dir, pool) = support::test_db().await;
    let pipeline = support::pipeline(&pool, TranslationChain::new(), None);

    let err = pipeline.enrich("run", "de", None).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn worker_links_rows_and_merges_duplicates() {
    let (_dir, pool) = support::test_db().await;
    let user = Uuid::new_v4();
    let resolver = IdentityResolver::new(pool.clone());
    let run = resolver.resolve(user, "run", None).await.unwrap().vocabulary_id;
    let ran = resolver.resolve(user, "ran", None).await.unwrap().vocabulary_id;
    sqlx::query("UPDATE vocabulary SET created_at = '2000-01-01T00:00:00.000Z' WHERE id = ?")
        .bind(run.to_string())
        .execute(&pool)
        .await
        .unwrap();
    encounters::insert_encounter(&pool, user, ran, None, "She ran home.").await.unwrap();

    let enricher = Arc::new(MockEnricher::new(&[("ran", "run")]));
    let pipeline = support::pipeline(&pool, support::translator(&[("run", "laufen")]), Some(enricher));
    let worker = EnrichmentWorker::new(pool.clone(), pipeline);

    let summary = worker.process_ids(user, &[run, ran], "de", 5, false).await.unwrap();
    assert_eq!(summary.enriched.len(), 2);
    assert!(summary.failed.is_empty());

    let keeper = vocabulary::load_vocabulary(&pool, run).await.unwrap().unwrap();
    assert!(keeper.is_active());
    assert_eq!(keeper.stem.as_deref(), Some("run"));
    assert!(!vocabulary::load_vocabulary(&pool, ran).await.unwrap().unwrap().is_active());
    assert_eq!(encounters::count_for_vocabulary(&pool, run).await.unwrap(), 1);

    assert_eq!(
        queue::item_status(&pool, user, run).await.unwrap().map(|(status, _)| status),
        Some(queue::QueueStatus::Done)
    );

    // Linked rows are skipped on the next pass
    let again = worker.process_ids(user, &[run], "de", 5, false).await.unwrap();
    assert_eq!(again.skipped, vec![run]);
}

#[tokio::test]
async fn failures_retry_until_the_attempt_limit() {
    let (_dir, pool) = support::test_db().await;
    let user = Uuid::new_v4();
    let vocab = IdentityResolver::new(pool.clone())
        .resolve(user, "obscure", None)
        .await
        .unwrap()
        .vocabulary_id;

    let pipeline = support::pipeline(&pool, TranslationChain::new(), Some(Arc::new(MockEnricher::failing())));
    let worker = EnrichmentWorker::new(pool.clone(), pipeline);

    let first = worker.process_ids(user, &[vocab], "de", 1, false).await.unwrap();
    assert!(first.failed[0].will_retry);
    let second = worker.process_ids(user, &[vocab], "de", 1, false).await.unwrap();
    assert!(second.failed[0].will_retry);
    let third = worker.process_ids(user, &[vocab], "de", 1, false).await.unwrap();
    assert!(!third.failed[0].will_retry);

    assert_eq!(
        queue::item_status(&pool, user, vocab).await.unwrap(),
        Some((queue::QueueStatus::Error, 3))
    );

    // Items in error are no longer claimed
    let fourth = worker.process_ids(user, &[vocab], "de", 1, false).await.unwrap();
    assert_eq!(fourth.skipped, vec![vocab]);
}

#[tokio::test]
async fn buffer_status_reports_replenishment_need() {
    let (_dir, pool) = support::test_db().await;
    let user = Uuid::new_v4();
    let resolver = IdentityResolver::new(pool.clone());
    for word in ["alpha", "beta", "gamma"] {
        resolver.resolve(user, word, None).await.unwrap();
    }

    let pipeline = support::pipeline(&pool, TranslationChain::new(), Some(Arc::new(MockEnricher::new(&[]))));
    let worker = EnrichmentWorker::new(pool.clone(), pipeline);

    let before = worker.buffer_status(user).await.unwrap();
    assert_eq!(before.enriched_count, 0);
    assert_eq!(before.un_enriched_count, 3);
    assert_eq!(before.buffer_target, 10);
    assert!(before.needs_replenishment);

    let summary = worker.process_unenriched(user, "de", 2, false).await.unwrap();
    assert_eq!(summary.enriched.len(), 2);

    let after = worker.buffer_status(user).await.unwrap();
    assert_eq!(after.enriched_count, 2);
    assert_eq!(after.un_enriched_count, 1);
}

#[tokio::test]
async fn replenishment_passes_over_rows_that_gave_up() {
    let (_dir, pool) = support::test_db().await;
    let user = Uuid::new_v4();
    let resolver = IdentityResolver::new(pool.clone());
    let flaky = resolver.resolve(user, "flaky", None).await.unwrap().vocabulary_id;
    let walk = resolver.resolve(user, "walk", None).await.unwrap().vocabulary_id;
    sqlx::query("UPDATE vocabulary SET created_at = '2000-01-01T00:00:00.000Z' WHERE id = ?")
        .bind(flaky.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let failing = support::pipeline(&pool, TranslationChain::new(), Some(Arc::new(MockEnricher::failing())));
    let failing_worker = EnrichmentWorker::new(pool.clone(), failing);
    for _ in 0..3 {
        failing_worker.process_ids(user, &[flaky], "de", 1, false).await.unwrap();
    }
    assert_eq!(
        queue::item_status(&pool, user, flaky).await.unwrap(),
        Some((queue::QueueStatus::Error, 3))
    );

    let pipeline = support::pipeline(&pool, TranslationChain::new(), Some(Arc::new(MockEnricher::new(&[]))));
    let worker = EnrichmentWorker::new(pool.clone(), pipeline);

    // The oldest row gave up, so the single slot goes to the next one
    let summary = worker.process_unenriched(user, "de", 1, false).await.unwrap();
    assert_eq!(summary.enriched.len(), 1);
    assert_eq!(summary.enriched[0].vocabulary_id, walk);
    assert!(summary.skipped.is_empty());

    let status = worker.buffer_status(user).await.unwrap();
    assert_eq!(status.enriched_count, 1);
    assert_eq!(status.un_enriched_count, 1);
    assert_eq!(status.error_count, 1);
    assert_eq!(status.pending_in_queue, 0);
}

#[tokio::test]
async fn forced_pass_retries_rows_that_gave_up() {
    let (_dir, pool) = support::test_db().await;
    let user = Uuid::new_v4();
    let flaky = IdentityResolver::new(pool.clone())
        .resolve(user, "flaky", None)
        .await
        .unwrap()
        .vocabulary_id;

    let failing = support::pipeline(&pool, TranslationChain::new(), Some(Arc::new(MockEnricher::failing())));
    let failing_worker = EnrichmentWorker::new(pool.clone(), failing);
    for _ in 0..3 {
        failing_worker.process_ids(user, &[flaky], "de", 1, false).await.unwrap();
    }

    let pipeline = support::pipeline(&pool, TranslationChain::new(), Some(Arc::new(MockEnricher::new(&[]))));
    let worker = EnrichmentWorker::new(pool.clone(), pipeline);

    let unforced = worker.process_unenriched(user, "de", 5, false).await.unwrap();
    assert!(unforced.enriched.is_empty());

    let forced = worker.process_unenriched(user, "de", 5, true).await.unwrap();
    assert_eq!(forced.enriched.len(), 1);
    assert_eq!(forced.enriched[0].vocabulary_id, flaky);
    assert_eq!(
        queue::item_status(&pool, user, flaky).await.unwrap().map(|(status, _)| status),
        Some(queue::QueueStatus::Done)
    );
    assert_eq!(worker.buffer_status(user).await.unwrap().error_count, 0);
}

#[tokio::test]
async fn forced_pass_refreshes_stale_entries() {
    let (_dir, pool) = support::test_db().await;
    let user = Uuid::new_v4();
    let run = IdentityResolver::new(pool.clone())
        .resolve(user, "run", None)
        .await
        .unwrap()
        .vocabulary_id;

    let enricher = Arc::new(MockEnricher::new(&[]));
    let pipeline = support::pipeline(&pool, support::translator(&[("run", "laufen")]), Some(enricher.clone()));
    let worker = EnrichmentWorker::new(pool.clone(), pipeline);

    let first = worker.process_ids(user, &[run], "de", 1, false).await.unwrap();
    let entry_id = first.enriched[0].global_dictionary_id;
    assert_eq!(enricher.call_count(), 1);

    sqlx::query("UPDATE global_dictionary SET enrichment_version = 1, english_definition = NULL WHERE id = ?")
        .bind(entry_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    // Linked rows are left alone unless forced
    let unforced = worker.process_ids(user, &[run], "de", 1, false).await.unwrap();
    assert_eq!(unforced.skipped, vec![run]);
    assert_eq!(enricher.call_count(), 1);

    let forced = worker.process_ids(user, &[run], "de", 1, true).await.unwrap();
    assert_eq!(forced.enriched[0].global_dictionary_id, entry_id);
    assert_eq!(enricher.call_count(), 2);

    let refreshed = dictionary::load_entry(&pool, entry_id).await.unwrap().unwrap();
    assert!(!refreshed.is_stale());
    assert_eq!(refreshed.enrichment_version, Some(ENRICHMENT_VERSION));
    assert_eq!(refreshed.english_definition.as_deref(), Some("definition of run"));

    // A current entry is reused even when forced
    worker.process_ids(user, &[run], "de", 1, true).await.unwrap();
    assert_eq!(enricher.call_count(), 2);
}

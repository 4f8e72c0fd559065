//! Push/pull replication between devices of one user

mod support;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use vocab_sync::db::{cards, queue, settings};
use vocab_sync::models::{PullResponse, SyncChange};
use vocab_sync::services::{EnrichmentWorker, SyncCoordinator};

use support::MockEnricher;

fn change(table: &str, operation: &str, id: Uuid, data: Value, version: Option<i64>) -> SyncChange {
    SyncChange {
        table: table.into(),
        operation: operation.into(),
        id: id.to_string(),
        data: data.as_object().cloned().unwrap_or_default(),
        version,
    }
}

fn ids(response: &PullResponse, table: &str) -> Vec<String> {
    response
        .rows(table)
        .iter()
        .filter_map(|row| row["id"].as_str().map(str::to_string))
        .collect()
}

fn row<'a>(response: &'a PullResponse, table: &str, id: Uuid) -> &'a Value {
    response
        .rows(table)
        .iter()
        .find(|row| row["id"] == id.to_string())
        .unwrap_or_else(|| panic!("{table} row {id} missing from pull"))
}

/// Rows written after a watermark must land in a later millisecond
async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Exact watermarks so deltas can be asserted row by row
async fn without_pull_overlap(pool: &sqlx::SqlitePool) {
    settings::set_setting(pool, "sync_pull_overlap_ms", 0).await.unwrap();
}

#[tokio::test]
async fn two_devices_sync_enrich_and_review() {
    let (_dir, pool) = support::test_db().await;
    without_pull_overlap(&pool).await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let (user, _) = support::create_user(&pool).await;

    // Device A captures a word with its card and the sentence it was seen in
    let vocabulary_id = Uuid::new_v4();
    let card_id = Uuid::new_v4();
    let encounter_id = Uuid::new_v4();
    let pushed = coordinator
        .push(
            user,
            vec![
                change("vocabulary", "insert", vocabulary_id, json!({"word": "Ran"}), None),
                change(
                    "learning_cards",
                    "insert",
                    card_id,
                    json!({"vocabulary_id": vocabulary_id.to_string()}),
                    None,
                ),
                change(
                    "encounters",
                    "insert",
                    encounter_id,
                    json!({
                        "vocabulary_id": vocabulary_id.to_string(),
                        "context": "She ran home.",
                        "occurred_at": "2026-10-16T08:00:00.000Z"
                    }),
                    None,
                ),
            ],
        )
        .await
        .unwrap();
    assert_eq!(pushed.response.applied, 3);
    assert!(pushed.response.id_remaps.is_empty());
    assert_eq!(pushed.new_vocabulary, vec![vocabulary_id]);

    // Device B starts from nothing
    let first_pull = coordinator.pull(user, None).await.unwrap();
    assert_eq!(row(&first_pull, "vocabulary", vocabulary_id)["word"], "ran");
    assert_eq!(ids(&first_pull, "learning_cards"), vec![card_id.to_string()]);
    assert_eq!(ids(&first_pull, "encounters"), vec![encounter_id.to_string()]);
    assert!(first_pull.rows("global_dictionary").is_empty());

    // Background enrichment links the row to a canonical entry
    tick().await;
    let enricher = Arc::new(MockEnricher::new(&[("ran", "run")]));
    let worker = EnrichmentWorker::new(
        pool.clone(),
        support::pipeline(&pool, support::translator(&[("ran", "lief")]), Some(enricher)),
    );
    let summary = worker.process_ids(user, &[vocabulary_id], "de", 5, false).await.unwrap();
    assert_eq!(summary.enriched.len(), 1);

    let second_pull = coordinator.pull(user, Some(&first_pull.synced_at)).await.unwrap();
    assert_eq!(ids(&second_pull, "vocabulary"), vec![vocabulary_id.to_string()]);
    assert!(second_pull.rows("learning_cards").is_empty());
    assert!(second_pull.rows("encounters").is_empty());
    let entries = second_pull.rows("global_dictionary");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["lemma"], "run");
    assert_eq!(
        row(&second_pull, "vocabulary", vocabulary_id)["global_dictionary_id"],
        entries[0]["id"]
    );

    // Device B reviews the card; device A's later edit is based on the old version
    let review = coordinator
        .push(
            user,
            vec![change("learning_cards", "update", card_id, json!({"state": 1, "reps": 1}), Some(1))],
        )
        .await
        .unwrap();
    assert_eq!(review.response.applied, 1);
    assert!(!review.response.has_conflicts());

    let stale = coordinator
        .push(
            user,
            vec![change("learning_cards", "update", card_id, json!({"reps": 5}), Some(1))],
        )
        .await
        .unwrap();
    assert_eq!(stale.response.applied, 0);
    assert_eq!(stale.response.conflicts.len(), 1);
    assert_eq!(stale.response.conflicts[0].server_version, 2);
    assert_eq!(stale.response.conflicts[0].table, "learning_cards");

    let card = coordinator.pull(user, None).await.unwrap();
    let card = row(&card, "learning_cards", card_id);
    assert_eq!(card["reps"], 1);
    assert_eq!(card["version"], 2);
}

#[tokio::test]
async fn pull_after_watermark_returns_only_changed_rows() {
    let (_dir, pool) = support::test_db().await;
    without_pull_overlap(&pool).await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let user = Uuid::new_v4();

    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
    coordinator
        .push(
            user,
            vec![
                change("books", "insert", first, json!({"title": "Dune"}), None),
                change("books", "insert", second, json!({"title": "Emma"}), None),
            ],
        )
        .await
        .unwrap();

    let baseline = coordinator.pull(user, None).await.unwrap();
    assert_eq!(baseline.rows("books").len(), 2);

    tick().await;
    coordinator
        .push(
            user,
            vec![change("books", "update", second, json!({"author": "Austen"}), None)],
        )
        .await
        .unwrap();

    let delta = coordinator.pull(user, Some(&baseline.synced_at)).await.unwrap();
    assert_eq!(ids(&delta, "books"), vec![second.to_string()]);
    assert_eq!(row(&delta, "books", second)["author"], "Austen");

    let nothing_new = coordinator.pull(user, Some(&delta.synced_at)).await.unwrap();
    assert!(nothing_new.rows("books").is_empty());
}

#[tokio::test]
async fn same_word_from_two_devices_remaps_to_one_row() {
    let (_dir, pool) = support::test_db().await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let user = Uuid::new_v4();

    let device_a = Uuid::new_v4();
    let outcome = coordinator
        .push(user, vec![change("vocabulary", "insert", device_a, json!({"word": "run"}), None)])
        .await
        .unwrap();
    assert_eq!(outcome.response.applied, 1);

    // Device B captured the same word offline, with a card and an encounter
    let device_b = Uuid::new_v4();
    let card_b = Uuid::new_v4();
    let encounter_b = Uuid::new_v4();
    let outcome = coordinator
        .push(
            user,
            vec![
                change("vocabulary", "insert", device_b, json!({"word": "Run "}), None),
                change(
                    "learning_cards",
                    "insert",
                    card_b,
                    json!({"vocabulary_id": device_b.to_string()}),
                    None,
                ),
                change(
                    "encounters",
                    "insert",
                    encounter_b,
                    json!({
                        "vocabulary_id": device_b.to_string(),
                        "context": "Run!",
                        "occurred_at": "2026-10-16T09:00:00.000Z"
                    }),
                    None,
                ),
            ],
        )
        .await
        .unwrap();
    assert_eq!(outcome.response.applied, 3);
    assert!(outcome.response.rejected.is_empty());
    assert!(outcome.new_vocabulary.is_empty());

    let remaps = &outcome.response.id_remaps;
    assert_eq!(remaps.len(), 2);
    assert_eq!(remaps[0].table, "vocabulary");
    assert_eq!(remaps[0].client_id, device_b.to_string());
    assert_eq!(remaps[0].server_id, device_a.to_string());
    assert_eq!(remaps[1].table, "learning_cards");
    assert_eq!(remaps[1].client_id, card_b.to_string());

    let pulled = coordinator.pull(user, None).await.unwrap();
    assert_eq!(ids(&pulled, "vocabulary"), vec![device_a.to_string()]);
    assert_eq!(ids(&pulled, "learning_cards"), vec![remaps[1].server_id.clone()]);
    assert_eq!(
        row(&pulled, "encounters", encounter_b)["vocabulary_id"],
        device_a.to_string()
    );
}

#[tokio::test]
async fn vocabulary_delete_tombstones_its_card() {
    let (_dir, pool) = support::test_db().await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let user = Uuid::new_v4();

    let vocabulary_id = Uuid::new_v4();
    coordinator
        .push(user, vec![change("vocabulary", "insert", vocabulary_id, json!({"word": "walk"}), None)])
        .await
        .unwrap();

    // A card is created for the new row even though the client sent none
    let before = coordinator.pull(user, None).await.unwrap();
    let cards = before.rows("learning_cards");
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0]["vocabulary_id"], vocabulary_id.to_string());
    assert!(cards[0]["deleted_at"].is_null());

    let deleted = coordinator
        .push(user, vec![change("vocabulary", "delete", vocabulary_id, json!({}), None)])
        .await
        .unwrap();
    assert_eq!(deleted.response.applied, 1);

    let after = coordinator.pull(user, None).await.unwrap();
    assert!(row(&after, "vocabulary", vocabulary_id)["deleted_at"].is_string());
    assert!(after.rows("learning_cards")[0]["deleted_at"].is_string());

    // Deleting again keeps the tombstone and is still accepted
    let again = coordinator
        .push(user, vec![change("vocabulary", "delete", vocabulary_id, json!({}), None)])
        .await
        .unwrap();
    assert_eq!(again.response.applied, 1);
}

#[tokio::test]
async fn set_members_follow_their_owned_set() {
    let (_dir, pool) = support::test_db().await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let (owner, stranger) = (Uuid::new_v4(), Uuid::new_v4());

    let set_id = Uuid::new_v4();
    let member_id = Uuid::new_v4();
    let outcome = coordinator
        .push(
            owner,
            vec![
                change(
                    "confusable_sets",
                    "insert",
                    set_id,
                    json!({"language_code": "en", "words": ["affect", "effect"]}),
                    None,
                ),
                change(
                    "confusable_set_members",
                    "insert",
                    member_id,
                    json!({"set_id": set_id.to_string(), "word": "affect"}),
                    None,
                ),
            ],
        )
        .await
        .unwrap();
    assert_eq!(outcome.response.applied, 2);

    // Another user cannot attach members to someone else's set
    let intruder = coordinator
        .push(
            stranger,
            vec![change(
                "confusable_set_members",
                "insert",
                Uuid::new_v4(),
                json!({"set_id": set_id.to_string(), "word": "effect"}),
                None,
            )],
        )
        .await
        .unwrap();
    assert_eq!(intruder.response.applied, 0);
    assert_eq!(intruder.response.rejected.len(), 1);

    let missing_parent = coordinator
        .push(
            owner,
            vec![change(
                "confusable_set_members",
                "insert",
                Uuid::new_v4(),
                json!({"word": "effect"}),
                None,
            )],
        )
        .await
        .unwrap();
    assert_eq!(missing_parent.response.rejected[0].reason, "set_id is required");

    let pulled = coordinator.pull(owner, None).await.unwrap();
    assert_eq!(row(&pulled, "confusable_sets", set_id)["words"], json!(["affect", "effect"]));
    assert_eq!(ids(&pulled, "confusable_set_members"), vec![member_id.to_string()]);

    let strangers_view = coordinator.pull(stranger, None).await.unwrap();
    assert!(strangers_view.rows("confusable_sets").is_empty());
    assert!(strangers_view.rows("confusable_set_members").is_empty());
}

#[tokio::test]
async fn users_never_see_each_others_rows() {
    let (_dir, pool) = support::test_db().await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let book = Uuid::new_v4();
    coordinator
        .push(alice, vec![change("books", "insert", book, json!({"title": "Dune"}), None)])
        .await
        .unwrap();

    // Bob cannot overwrite or delete Alice's row by reusing its id
    let hijack = coordinator
        .push(
            bob,
            vec![
                change("books", "upsert", book, json!({"title": "Mine"}), None),
                change("books", "update", book, json!({"title": "Mine"}), None),
                change("books", "delete", book, json!({}), None),
            ],
        )
        .await
        .unwrap();
    assert_eq!(hijack.response.applied, 0);
    assert_eq!(hijack.response.rejected.len(), 3);

    let alice_view = coordinator.pull(alice, None).await.unwrap();
    assert_eq!(row(&alice_view, "books", book)["title"], "Dune");
    assert!(coordinator.pull(bob, None).await.unwrap().rows("books").is_empty());
}

#[tokio::test]
async fn pull_resends_rows_stamped_just_before_the_watermark() {
    let (_dir, pool) = support::test_db().await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let user = Uuid::new_v4();

    let (late, old) = (Uuid::new_v4(), Uuid::new_v4());
    coordinator
        .push(
            user,
            vec![
                change("books", "insert", late, json!({"title": "Dune"}), None),
                change("books", "insert", old, json!({"title": "Emma"}), None),
            ],
        )
        .await
        .unwrap();

    // A write that committed after the pull but was stamped before it
    let watermark = "2026-10-16T12:00:00.000Z";
    for (id, stamp) in [(late, "2026-10-16T11:59:58.000Z"), (old, "2026-10-16T11:00:00.000Z")] {
        sqlx::query("UPDATE books SET updated_at = ? WHERE id = ?")
            .bind(stamp)
            .bind(id.to_string())
            .execute(&pool)
            .await
            .unwrap();
    }

    let delta = coordinator.pull(user, Some(watermark)).await.unwrap();
    assert_eq!(ids(&delta, "books"), vec![late.to_string()]);

    without_pull_overlap(&pool).await;
    let exact = coordinator.pull(user, Some(watermark)).await.unwrap();
    assert!(exact.rows("books").is_empty());
}

#[tokio::test]
async fn recaptured_duplicate_is_queued_again() {
    let (_dir, pool) = support::test_db().await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let user = Uuid::new_v4();

    let (run, ran) = (Uuid::new_v4(), Uuid::new_v4());
    let first = coordinator
        .push(
            user,
            vec![
                change("vocabulary", "insert", run, json!({"word": "run"}), None),
                change("vocabulary", "insert", ran, json!({"word": "ran"}), None),
            ],
        )
        .await
        .unwrap();
    assert_eq!(first.new_vocabulary, vec![run, ran]);
    sqlx::query("UPDATE vocabulary SET created_at = '2000-01-01T00:00:00.000Z' WHERE id = ?")
        .bind(run.to_string())
        .execute(&pool)
        .await
        .unwrap();

    // Enrichment merges "ran" into "run" and tombstones it
    let worker = EnrichmentWorker::new(
        pool.clone(),
        support::pipeline(
            &pool,
            support::translator(&[("run", "laufen")]),
            Some(Arc::new(MockEnricher::new(&[("ran", "run")]))),
        ),
    );
    worker.process_ids(user, &[run, ran], "de", 5, false).await.unwrap();
    let pulled = coordinator.pull(user, None).await.unwrap();
    assert!(row(&pulled, "vocabulary", ran)["deleted_at"].is_string());

    // Another device captures "ran" again before it ever saw the merge
    let recaptured = coordinator
        .push(
            user,
            vec![change("vocabulary", "insert", Uuid::new_v4(), json!({"word": "ran"}), None)],
        )
        .await
        .unwrap();
    assert_eq!(recaptured.response.id_remaps[0].server_id, ran.to_string());
    assert_eq!(recaptured.new_vocabulary, vec![ran]);
    assert_eq!(
        queue::item_status(&pool, user, ran).await.unwrap(),
        Some((queue::QueueStatus::Pending, 0))
    );

    // Enriching it again folds it back into "run"
    let summary = worker.process_ids(user, &recaptured.new_vocabulary, "de", 5, false).await.unwrap();
    assert_eq!(summary.enriched.len(), 1);
    let pulled = coordinator.pull(user, None).await.unwrap();
    let active: Vec<&Value> = pulled
        .rows("vocabulary")
        .iter()
        .filter(|row| row["deleted_at"].is_null())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], run.to_string());
    assert!(!active[0]["global_dictionary_id"].is_null());
}

#[tokio::test]
async fn push_restores_cards_for_active_vocabulary() {
    let (_dir, pool) = support::test_db().await;
    let coordinator = SyncCoordinator::new(pool.clone());
    let user = Uuid::new_v4();

    let vocabulary_id = Uuid::new_v4();
    coordinator
        .push(user, vec![change("vocabulary", "insert", vocabulary_id, json!({"word": "walk"}), None)])
        .await
        .unwrap();
    let pulled = coordinator.pull(user, None).await.unwrap();
    let card_id: Uuid = pulled.rows("learning_cards")[0]["id"].as_str().unwrap().parse().unwrap();

    // A client drops the card but keeps the word
    let dropped = coordinator
        .push(user, vec![change("learning_cards", "delete", card_id, json!({}), None)])
        .await
        .unwrap();
    assert_eq!(dropped.response.applied, 1);

    assert!(cards::missing_for_user(&pool, user).await.unwrap().is_empty());
    let pulled = coordinator.pull(user, None).await.unwrap();
    let active: Vec<&Value> = pulled
        .rows("learning_cards")
        .iter()
        .filter(|card| card["deleted_at"].is_null())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["vocabulary_id"], vocabulary_id.to_string());
}

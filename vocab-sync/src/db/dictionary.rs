//! Canonical dictionary and word variant operations
//!
//! Entries are unique per `(language_code, lemma)`. Variants map surface forms
//! to entries so inflected captures resolve without another AI call.

use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use vocab_common::text::normalize;
use vocab_common::time::now_timestamp;
use vocab_common::{Error, Result};

use super::parse_uuid;
use crate::models::{AiEnhancement, DictionaryEntry, InsertOutcome, TranslationEntry, ENRICHMENT_VERSION};

const ENTRY_COLUMNS: &str = "gd.id, gd.language_code, gd.lemma, gd.translations, gd.pronunciation_ipa, \
     gd.part_of_speech, gd.english_definition, gd.synonyms, gd.confusables, gd.cefr_level, \
     gd.confidence, gd.enrichment_version, gd.created_at, gd.updated_at";

fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw)
        .map_err(|e| Error::Internal(format!("Corrupt global_dictionary.{}: {}", column, e)))
}

fn row_to_entry(row: &SqliteRow) -> Result<DictionaryEntry> {
    let id: String = row.get("id");

    Ok(DictionaryEntry {
        id: parse_uuid(&id)?,
        language_code: row.get("language_code"),
        lemma: row.get("lemma"),
        translations: json_column(row, "translations")?,
        pronunciation_ipa: row.get("pronunciation_ipa"),
        part_of_speech: row.get("part_of_speech"),
        english_definition: row.get("english_definition"),
        synonyms: json_column(row, "synonyms")?,
        confusables: json_column(row, "confusables")?,
        cefr_level: row.get("cefr_level"),
        confidence: row.get("confidence"),
        enrichment_version: row.get("enrichment_version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("Serialize failed: {}", e)))
}

pub async fn load_entry(pool: &SqlitePool, id: Uuid) -> Result<Option<DictionaryEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM global_dictionary gd WHERE gd.id = ?");
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(pool).await?;
    row.as_ref().map(row_to_entry).transpose()
}

/// Exact lookup by normalized lemma
pub async fn find_by_lemma(pool: &SqlitePool, language_code: &str, lemma: &str) -> Result<Option<DictionaryEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM global_dictionary gd WHERE gd.language_code = ? AND gd.lemma = ?"
    );
    let row = sqlx::query(&sql)
        .bind(language_code)
        .bind(normalize(lemma))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_entry).transpose()
}

/// Lookup through the word variant table
pub async fn find_by_variant(pool: &SqlitePool, language_code: &str, word: &str) -> Result<Option<DictionaryEntry>> {
    let sql = format!(
        r#"
        SELECT {ENTRY_COLUMNS}
        FROM word_variants wv
        JOIN global_dictionary gd ON gd.id = wv.global_dictionary_id
        WHERE wv.language_code = ? AND wv.variant = ?
        "#
    );
    let row = sqlx::query(&sql)
        .bind(language_code)
        .bind(normalize(word))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_entry).transpose()
}

/// Insert a new entry, reporting a lost `(language_code, lemma)` race as `AlreadyExists`
pub async fn insert_entry(pool: &SqlitePool, entry: &DictionaryEntry) -> Result<InsertOutcome> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO global_dictionary (
            id, language_code, lemma, translations, pronunciation_ipa, part_of_speech,
            english_definition, synonyms, confusables, cefr_level, confidence,
            enrichment_version, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(&entry.language_code)
    .bind(&entry.lemma)
    .bind(to_json(&entry.translations)?)
    .bind(&entry.pronunciation_ipa)
    .bind(&entry.part_of_speech)
    .bind(&entry.english_definition)
    .bind(to_json(&entry.synonyms)?)
    .bind(to_json(&entry.confusables)?)
    .bind(&entry.cefr_level)
    .bind(entry.confidence)
    .bind(entry.enrichment_version)
    .bind(&entry.created_at)
    .bind(&entry.updated_at)
    .execute(pool)
    .await
    .map_err(Error::from);

    match inserted {
        Ok(_) => Ok(InsertOutcome::Created(entry.id)),
        Err(err) if err.is_unique_violation() => {
            let winner = find_by_lemma(pool, &entry.language_code, &entry.lemma)
                .await?
                .ok_or_else(|| Error::Internal(format!("entry '{}' vanished after insert race", entry.lemma)))?;
            Ok(InsertOutcome::AlreadyExists(winner.id))
        }
        Err(err) => Err(err),
    }
}

/// Map a surface form to an entry (last writer wins)
pub async fn upsert_variant(
    pool: &SqlitePool,
    language_code: &str,
    variant: &str,
    entry_id: Uuid,
    method: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO word_variants (language_code, variant, global_dictionary_id, method, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(language_code, variant) DO UPDATE SET
            global_dictionary_id = excluded.global_dictionary_id,
            method = excluded.method
        "#,
    )
    .bind(language_code)
    .bind(normalize(variant))
    .bind(entry_id.to_string())
    .bind(method)
    .bind(now_timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

/// Add or replace the translation for one target language (in-place upgrade)
///
/// Other languages in the map are left untouched, so concurrent upgrades for
/// different languages do not overwrite each other.
pub async fn set_translation(
    pool: &SqlitePool,
    id: Uuid,
    language_code: &str,
    translation: &TranslationEntry,
) -> Result<()> {
    sqlx::query(
        "UPDATE global_dictionary SET translations = json_set(translations, ?, json(?)), updated_at = ? WHERE id = ?",
    )
    .bind(format!("$.\"{}\"", language_code))
    .bind(to_json(translation)?)
    .bind(now_timestamp())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Overwrite the AI-derived fields of an entry and stamp the current version
///
/// The lemma and the translations for other languages are kept.
pub async fn update_enrichment(
    pool: &SqlitePool,
    id: Uuid,
    ai: &AiEnhancement,
    language_code: &str,
    translation: &TranslationEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE global_dictionary SET
            translations = json_set(translations, ?, json(?)),
            pronunciation_ipa = ?,
            part_of_speech = ?,
            english_definition = ?,
            synonyms = ?,
            confusables = ?,
            cefr_level = ?,
            confidence = ?,
            enrichment_version = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(format!("$.\"{}\"", language_code))
    .bind(to_json(translation)?)
    .bind(&ai.pronunciation_ipa)
    .bind(&ai.part_of_speech)
    .bind(&ai.english_definition)
    .bind(to_json(&ai.synonyms)?)
    .bind(to_json(&ai.confusables)?)
    .bind(&ai.cefr_level)
    .bind(ai.confidence)
    .bind(ENRICHMENT_VERSION)
    .bind(now_timestamp())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Entries referenced by a set of ids, as JSON rows for pull responses
pub async fn load_entries_json(pool: &SqlitePool, ids: &[Uuid]) -> Result<Vec<serde_json::Value>> {
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(entry) = load_entry(pool, *id).await? {
            rows.push(
                serde_json::to_value(&entry)
                    .map_err(|e| Error::Internal(format!("Serialize entry failed: {}", e)))?,
            );
        }
    }
    Ok(rows)
}

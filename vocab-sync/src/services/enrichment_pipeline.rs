//! Word enrichment pipeline
//!
//! Resolution order for a captured word:
//! 1. canonical entry by lemma
//! 2. word variant table
//! 3. machine translation, AI enhancement, then persist a new entry
//!
//! Cached entries missing the requested target language are upgraded in place
//! with a machine translation instead of being re-enriched. A forced pass
//! reruns both providers for entries stamped with an older enrichment version.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use vocab_common::text::normalize;
use vocab_common::time::now_timestamp;
use vocab_common::{Error, Result};

use super::translation::{resolve_translation, ProviderError, TranslationChain, SOURCE_LANGUAGE};
use crate::db::dictionary;
use crate::models::{
    AiEnhancement, DictionaryEntry, InsertOutcome, TranslationEntry, Translations, ENRICHMENT_VERSION,
};

/// Variant mapping written for the captured surface form
const VARIANT_METHOD_ENRICHMENT: &str = "enrichment";
/// Variant mapping written for the lemma itself
const VARIANT_METHOD_LEMMA: &str = "lemma";

/// Input to the AI step
#[derive(Debug, Clone, Copy)]
pub struct EnhancementRequest<'a> {
    pub word: &'a str,
    pub context: Option<&'a str>,
    pub native_language: &'a str,
    pub machine_translation: &'a str,
}

/// Semantic enrichment backend (lemma, definition, synonyms, confusables)
#[async_trait]
pub trait SemanticEnricher: Send + Sync {
    async fn enhance(&self, request: &EnhancementRequest<'_>) -> std::result::Result<AiEnhancement, ProviderError>;
}

/// Accept ISO 639-1 style codes with an optional region (`de`, `pt-br`)
pub fn normalize_language_code(code: &str) -> Result<String> {
    let code = code.trim().to_lowercase();
    let mut parts = code.split('-');
    let base_ok = parts
        .next()
        .is_some_and(|base| (2..=3).contains(&base.len()) && base.chars().all(|c| c.is_ascii_lowercase()));
    let region_ok = parts.all(|region| (2..=4).contains(&region.len()) && region.chars().all(|c| c.is_ascii_alphanumeric()));

    if base_ok && region_ok {
        Ok(code)
    } else {
        Err(Error::InvalidInput(format!("invalid language code '{}'", code)))
    }
}

#[derive(Clone)]
pub struct EnrichmentPipeline {
    db: SqlitePool,
    translator: TranslationChain,
    enricher: Option<Arc<dyn SemanticEnricher>>,
}

impl EnrichmentPipeline {
    pub fn new(db: SqlitePool, translator: TranslationChain, enricher: Option<Arc<dyn SemanticEnricher>>) -> Self {
        Self { db, translator, enricher }
    }

    pub fn translator(&self) -> &TranslationChain {
        &self.translator
    }

    /// Canonical entry for `word` in `target_language`, enriching on a miss
    pub async fn enrich(&self, word: &str, target_language: &str, context: Option<&str>) -> Result<DictionaryEntry> {
        let normalized = normalize(word);
        if normalized.is_empty() {
            return Err(Error::InvalidInput("word must not be empty".into()));
        }
        let target_language = normalize_language_code(target_language)?;

        if let Some(entry) = dictionary::find_by_lemma(&self.db, SOURCE_LANGUAGE, &normalized).await? {
            debug!(word = %normalized, entry_id = %entry.id, "Dictionary hit by lemma");
            return self.ensure_translation(entry, &target_language, context).await;
        }

        if let Some(entry) = dictionary::find_by_variant(&self.db, SOURCE_LANGUAGE, &normalized).await? {
            debug!(word = %normalized, entry_id = %entry.id, lemma = %entry.lemma, "Dictionary hit by variant");
            return self.ensure_translation(entry, &target_language, context).await;
        }

        self.create_entry(&normalized, &target_language, context).await
    }

    /// Like [`enrich`](Self::enrich), but a cached entry from an older
    /// enrichment version is refreshed through both providers
    pub async fn re_enrich(&self, word: &str, target_language: &str, context: Option<&str>) -> Result<DictionaryEntry> {
        let normalized = normalize(word);
        if normalized.is_empty() {
            return Err(Error::InvalidInput("word must not be empty".into()));
        }
        let target = normalize_language_code(target_language)?;

        let cached = match dictionary::find_by_lemma(&self.db, SOURCE_LANGUAGE, &normalized).await? {
            Some(entry) => Some(entry),
            None => dictionary::find_by_variant(&self.db, SOURCE_LANGUAGE, &normalized).await?,
        };

        match cached {
            Some(entry) if entry.is_stale() => self.refresh_entry(entry, &target, context).await,
            _ => self.enrich(&normalized, &target, context).await,
        }
    }

    /// Variant-table lookup that never calls a provider
    pub async fn find_cached(&self, word: &str) -> Result<Option<DictionaryEntry>> {
        dictionary::find_by_variant(&self.db, SOURCE_LANGUAGE, word).await
    }

    async fn create_entry(&self, word: &str, target_language: &str, context: Option<&str>) -> Result<DictionaryEntry> {
        let (translation, ai) = self.run_providers(word, target_language, context).await?;

        let lemma = match normalize(&ai.lemma) {
            lemma if lemma.is_empty() => word.to_string(),
            lemma => lemma,
        };

        // The lemma may already be known under another surface form
        if lemma != word {
            if let Some(existing) = dictionary::find_by_lemma(&self.db, SOURCE_LANGUAGE, &lemma).await? {
                dictionary::upsert_variant(&self.db, SOURCE_LANGUAGE, word, existing.id, VARIANT_METHOD_ENRICHMENT)
                    .await?;
                return self.ensure_translation(existing, target_language, context).await;
            }
        }

        let mut translations = Translations::new();
        translations.insert(target_language.to_string(), translation);

        let now = now_timestamp();
        let candidate = DictionaryEntry {
            id: Uuid::new_v4(),
            language_code: SOURCE_LANGUAGE.to_string(),
            lemma: lemma.clone(),
            translations,
            pronunciation_ipa: ai.pronunciation_ipa.clone(),
            part_of_speech: ai.part_of_speech.clone(),
            english_definition: ai.english_definition.clone(),
            synonyms: ai.synonyms.clone(),
            confusables: ai.confusables.clone(),
            cefr_level: ai.cefr_level.clone(),
            confidence: Some(ai.confidence),
            enrichment_version: Some(ENRICHMENT_VERSION),
            created_at: now.clone(),
            updated_at: now,
        };

        let entry = match dictionary::insert_entry(&self.db, &candidate).await? {
            InsertOutcome::Created(id) => {
                info!(word = %word, lemma = %lemma, entry_id = %id, "Created dictionary entry");
                candidate
            }
            InsertOutcome::AlreadyExists(id) => {
                info!(word = %word, lemma = %lemma, entry_id = %id, "Dictionary entry created concurrently, reusing");
                let existing = dictionary::load_entry(&self.db, id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("dictionary entry {}", id)))?;
                self.ensure_translation(existing, target_language, context).await?
            }
        };

        dictionary::upsert_variant(&self.db, SOURCE_LANGUAGE, word, entry.id, VARIANT_METHOD_ENRICHMENT).await?;
        if lemma != word {
            dictionary::upsert_variant(&self.db, SOURCE_LANGUAGE, &lemma, entry.id, VARIANT_METHOD_LEMMA).await?;
        }

        Ok(entry)
    }

    /// Machine translation followed by AI enhancement, resolved into one translation
    async fn run_providers(
        &self,
        word: &str,
        target_language: &str,
        context: Option<&str>,
    ) -> Result<(TranslationEntry, AiEnhancement)> {
        let enricher = self
            .enricher
            .as_ref()
            .ok_or_else(|| Error::Config("semantic enrichment is not configured".into()))?;

        let machine = self.translator.translate(word, target_language, context).await;

        let request = EnhancementRequest {
            word,
            context,
            native_language: target_language,
            machine_translation: &machine.translation,
        };
        let ai = enricher
            .enhance(&request)
            .await
            .map_err(|e| Error::Internal(format!("AI enhancement failed for '{}': {}", word, e)))?;

        let translation = resolve_translation(&machine.translation, machine.source, Some(&ai));
        Ok((translation, ai))
    }

    async fn refresh_entry(
        &self,
        entry: DictionaryEntry,
        target_language: &str,
        context: Option<&str>,
    ) -> Result<DictionaryEntry> {
        let (translation, ai) = self.run_providers(&entry.lemma, target_language, context).await?;
        dictionary::update_enrichment(&self.db, entry.id, &ai, target_language, &translation).await?;

        info!(
            entry_id = %entry.id,
            lemma = %entry.lemma,
            previous_version = ?entry.enrichment_version,
            version = ENRICHMENT_VERSION,
            "Re-enriched stale dictionary entry"
        );

        dictionary::load_entry(&self.db, entry.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dictionary entry {}", entry.id)))
    }

    /// Add a machine translation for `target_language` when the entry lacks one
    async fn ensure_translation(
        &self,
        entry: DictionaryEntry,
        target_language: &str,
        context: Option<&str>,
    ) -> Result<DictionaryEntry> {
        if entry.translation_for(target_language).is_some() {
            return Ok(entry);
        }

        let machine = self.translator.translate(&entry.lemma, target_language, context).await;
        let translation = resolve_translation(&machine.translation, machine.source, None);
        dictionary::set_translation(&self.db, entry.id, target_language, &translation).await?;

        info!(
            entry_id = %entry.id,
            lemma = %entry.lemma,
            language = %target_language,
            source = translation.source.as_str(),
            "Upgraded dictionary entry with new language"
        );

        dictionary::load_entry(&self.db, entry.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dictionary entry {}", entry.id)))
    }
}

//! Canonical dictionary entries and translation records
//!
//! Entries are language-scoped and shared across users. Translations are keyed
//! by target language code and record which provider produced the primary text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current enrichment schema version; entries stamped lower are stale
pub const ENRICHMENT_VERSION: i64 = 2;

/// Provider that produced a primary translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationSource {
    Deepl,
    Google,
    Ai,
    /// No provider succeeded; the "translation" is the word itself
    None,
}

impl TranslationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationSource::Deepl => "deepl",
            TranslationSource::Google => "google",
            TranslationSource::Ai => "ai",
            TranslationSource::None => "none",
        }
    }
}

/// Translation into one target language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub primary: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    pub source: TranslationSource,
}

/// Translations keyed by target language code
pub type Translations = BTreeMap<String, TranslationEntry>;

/// A commonly confused word and how to tell it apart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confusable {
    pub word: String,
    #[serde(default)]
    pub explanation: String,
}

/// Canonical dictionary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub id: Uuid,
    pub language_code: String,
    pub lemma: String,
    pub translations: Translations,
    pub pronunciation_ipa: Option<String>,
    pub part_of_speech: Option<String>,
    pub english_definition: Option<String>,
    pub synonyms: Vec<String>,
    pub confusables: Vec<Confusable>,
    pub cefr_level: Option<String>,
    pub confidence: Option<f64>,
    pub enrichment_version: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl DictionaryEntry {
    /// True when the entry was produced by an older enrichment schema
    pub fn is_stale(&self) -> bool {
        self.enrichment_version
            .map_or(true, |version| version < ENRICHMENT_VERSION)
    }

    pub fn translation_for(&self, language_code: &str) -> Option<&TranslationEntry> {
        self.translations.get(language_code)
    }
}

/// Output of the AI semantic enrichment step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiEnhancement {
    /// Dictionary form of the word; empty when the model omitted it
    #[serde(default, alias = "stem")]
    pub lemma: String,
    #[serde(default)]
    pub english_definition: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub confusables: Vec<Confusable>,
    #[serde(default)]
    pub pronunciation_ipa: Option<String>,
    #[serde(default)]
    pub cefr_level: Option<String>,
    /// Model's translation proposal, applied only above the confidence gate
    #[serde(default)]
    pub best_native_translation: Option<String>,
    #[serde(default)]
    pub native_alternatives: Vec<String>,
    /// 0.0 to 1.0; missing means 0
    #[serde(default)]
    pub confidence: f64,
}

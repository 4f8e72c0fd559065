//! Machine translation fallback chain
//!
//! Providers are tried in registration order (DeepL, then Google). Each answer
//! passes the quality filter before it is accepted; when nothing usable comes
//! back the word itself is returned with source `none`. The chain never fails.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::deepl_client::DeepLClient;
use super::google_client::GoogleTranslateClient;
use crate::models::{AiEnhancement, TranslationEntry, TranslationSource};

/// AI proposals at or above this confidence replace the machine translation
pub const AI_OVERRIDE_CONFIDENCE: f64 = 0.6;

/// Source language of every captured word
pub const SOURCE_LANGUAGE: &str = "en";

static PUNCTUATION_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s\p{P}]+$").expect("punctuation pattern is valid"));

/// Provider client errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0} API key not configured")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// A machine translation backend
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Source tag stored with translations from this provider
    fn source(&self) -> TranslationSource;

    /// Translate an English word; `Ok(None)` means the provider had no answer
    async fn translate(
        &self,
        word: &str,
        target_language: &str,
        context: Option<&str>,
    ) -> Result<Option<String>, ProviderError>;
}

/// Output of the chain
#[derive(Debug, Clone, PartialEq)]
pub struct MachineTranslation {
    pub translation: String,
    pub source: TranslationSource,
}

/// Reject empty, too short, untranslated or punctuation-only output
pub fn is_valid_translation(translation: &str, input_word: &str) -> bool {
    let cleaned = translation.trim();
    if cleaned.chars().count() < 2 {
        return false;
    }
    if cleaned.to_lowercase() == input_word.trim().to_lowercase() {
        return false;
    }
    !PUNCTUATION_ONLY.is_match(cleaned)
}

/// Ordered list of providers
#[derive(Clone, Default)]
pub struct TranslationChain {
    providers: Vec<Arc<dyn TranslationProvider>>,
}

impl TranslationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn TranslationProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Chain with a provider for every configured key, DeepL first
    pub fn from_keys(
        deepl_api_key: Option<&str>,
        google_api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut chain = Self::new();
        if let Some(key) = deepl_api_key {
            chain = chain.with_provider(Arc::new(DeepLClient::new(key, timeout)?));
        }
        if let Some(key) = google_api_key {
            chain = chain.with_provider(Arc::new(GoogleTranslateClient::new(key, timeout)?));
        }
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Translate `word`, falling through providers until one gives a usable answer
    pub async fn translate(&self, word: &str, target_language: &str, context: Option<&str>) -> MachineTranslation {
        for provider in &self.providers {
            let source = provider.source();
            match provider.translate(word, target_language, context).await {
                Ok(Some(text)) if is_valid_translation(&text, word) => {
                    debug!(word = %word, source = source.as_str(), translation = %text, "Translation accepted");
                    return MachineTranslation {
                        translation: text.trim().to_string(),
                        source,
                    };
                }
                Ok(Some(text)) => {
                    warn!(word = %word, source = source.as_str(), translation = %text, "Rejecting low-quality translation");
                }
                Ok(None) => {
                    debug!(word = %word, source = source.as_str(), "Provider returned no translation");
                }
                Err(e) => {
                    warn!(word = %word, source = source.as_str(), error = %e, "Translation provider failed");
                }
            }
        }

        debug!(word = %word, "No translation available, using the word itself");
        MachineTranslation {
            translation: word.to_string(),
            source: TranslationSource::None,
        }
    }
}

fn push_unique(list: &mut Vec<String>, primary: &str, candidate: &str) {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return;
    }
    let lowered = candidate.to_lowercase();
    if lowered == primary.to_lowercase() || list.iter().any(|existing| existing.to_lowercase() == lowered) {
        return;
    }
    list.push(candidate.to_string());
}

/// Decide the primary translation between machine output and the AI proposal
///
/// The AI proposal wins at `AI_OVERRIDE_CONFIDENCE` or above; the machine
/// translation is then kept as the first alternative unless it is the same
/// word or was only the untranslated input.
pub fn resolve_translation(
    machine: &str,
    machine_source: TranslationSource,
    ai: Option<&AiEnhancement>,
) -> TranslationEntry {
    let override_text = ai.and_then(|ai| {
        let proposal = ai.best_native_translation.as_deref()?.trim();
        (ai.confidence >= AI_OVERRIDE_CONFIDENCE && !proposal.is_empty()).then_some(proposal)
    });

    let (primary, source) = match override_text {
        Some(text) => (text.to_string(), TranslationSource::Ai),
        None => (machine.to_string(), machine_source),
    };

    let mut alternatives = Vec::new();
    if source == TranslationSource::Ai && machine_source != TranslationSource::None {
        push_unique(&mut alternatives, &primary, machine);
    }
    if let Some(ai) = ai {
        for alternative in &ai.native_alternatives {
            push_unique(&mut alternatives, &primary, alternative);
        }
    }

    TranslationEntry {
        primary,
        alternatives,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai(translation: Option<&str>, confidence: f64) -> AiEnhancement {
        AiEnhancement {
            lemma: "mercurial".into(),
            best_native_translation: translation.map(str::to_string),
            confidence,
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_accepts() {
        assert!(is_valid_translation("Entwickler", "developer"));
        assert!(is_valid_translation("zu", "to"));
        assert!(is_valid_translation("Hallo!", "hello"));
    }

    #[test]
    fn test_validation_rejects() {
        assert!(!is_valid_translation("x", "test"));
        assert!(!is_valid_translation("", "test"));
        assert!(!is_valid_translation("   ", "test"));
        assert!(!is_valid_translation("Developer", "developer"));
        assert!(!is_valid_translation("...", "test"));
        assert!(!is_valid_translation("---", "test"));
        assert!(!is_valid_translation("!?.", "test"));
    }

    #[test]
    fn test_high_confidence_ai_overrides_and_demotes() {
        let entry = resolve_translation("Quecksilber", TranslationSource::Deepl, Some(&ai(Some("launisch"), 0.9)));
        assert_eq!(entry.primary, "launisch");
        assert_eq!(entry.source, TranslationSource::Ai);
        assert_eq!(entry.alternatives, vec!["Quecksilber".to_string()]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let entry = resolve_translation("Quecksilber", TranslationSource::Deepl, Some(&ai(Some("wechselhaft"), 0.6)));
        assert_eq!(entry.source, TranslationSource::Ai);

        let entry = resolve_translation("Quecksilber", TranslationSource::Google, Some(&ai(Some("launisch"), 0.59)));
        assert_eq!(entry.primary, "Quecksilber");
        assert_eq!(entry.source, TranslationSource::Google);
    }

    #[test]
    fn test_missing_proposal_keeps_machine() {
        let entry = resolve_translation("Quecksilber", TranslationSource::Deepl, Some(&ai(None, 0.9)));
        assert_eq!(entry.primary, "Quecksilber");

        let entry = resolve_translation("Quecksilber", TranslationSource::Deepl, None);
        assert_eq!(entry.source, TranslationSource::Deepl);
        assert!(entry.alternatives.is_empty());
    }

    #[test]
    fn test_same_word_is_not_duplicated() {
        let entry = resolve_translation("Launisch", TranslationSource::Deepl, Some(&ai(Some("launisch"), 0.9)));
        assert_eq!(entry.primary, "launisch");
        assert!(entry.alternatives.is_empty());
    }

    #[test]
    fn test_untranslated_fallback_is_not_demoted() {
        let entry = resolve_translation("mercurial", TranslationSource::None, Some(&ai(Some("launisch"), 0.8)));
        assert_eq!(entry.primary, "launisch");
        assert!(entry.alternatives.is_empty());
    }

    #[test]
    fn test_native_alternatives_merged_without_repeats() {
        let mut enhancement = ai(Some("launisch"), 0.9);
        enhancement.native_alternatives = vec!["wechselhaft".into(), "Launisch".into(), "quecksilber".into()];

        let entry = resolve_translation("Quecksilber", TranslationSource::Deepl, Some(&enhancement));
        assert_eq!(entry.alternatives, vec!["Quecksilber".to_string(), "wechselhaft".to_string()]);
    }

    struct Fixed(TranslationSource, Result<Option<String>, ()>);

    #[async_trait]
    impl TranslationProvider for Fixed {
        fn source(&self) -> TranslationSource {
            self.0
        }

        async fn translate(&self, _: &str, _: &str, _: Option<&str>) -> Result<Option<String>, ProviderError> {
            self.1.clone().map_err(|_| ProviderError::Api(500, "boom".into()))
        }
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_next_provider() {
        let chain = TranslationChain::new()
            .with_provider(Arc::new(Fixed(TranslationSource::Deepl, Err(()))))
            .with_provider(Arc::new(Fixed(TranslationSource::Google, Ok(Some("laufen".into())))));

        let result = chain.translate("run", "de", None).await;
        assert_eq!(result.translation, "laufen");
        assert_eq!(result.source, TranslationSource::Google);
    }

    #[tokio::test]
    async fn test_chain_skips_invalid_output() {
        let chain = TranslationChain::new()
            .with_provider(Arc::new(Fixed(TranslationSource::Deepl, Ok(Some("Run".into())))))
            .with_provider(Arc::new(Fixed(TranslationSource::Google, Ok(Some("...".into())))));

        let result = chain.translate("run", "de", None).await;
        assert_eq!(result.translation, "run");
        assert_eq!(result.source, TranslationSource::None);
    }

    #[tokio::test]
    async fn test_empty_chain_returns_word() {
        let chain = TranslationChain::new();
        assert!(chain.is_empty());
        let result = chain.translate("ubiquitous", "de", None).await;
        assert_eq!(result.source, TranslationSource::None);
        assert_eq!(result.translation, "ubiquitous");
    }
}

//! Shared fixtures for vocab-sync integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;
use vocab_common::api::auth::register_token;

use vocab_sync::config::ServiceConfig;
use vocab_sync::models::{AiEnhancement, TranslationSource};
use vocab_sync::services::{
    EnhancementRequest, EnrichmentJob, EnrichmentPipeline, EnrichmentTrigger, ProviderError, SemanticEnricher,
    TranslationChain, TranslationProvider,
};
use vocab_sync::AppState;

pub const SERVICE_TOKEN: &str = "service-secret";

/// Fresh database in a temporary directory; keep the TempDir alive for the test
pub async fn test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("create temp dir");
    let pool = vocab_sync::db::init_database_pool(&dir.path().join("vocab.db"))
        .await
        .expect("init test database");
    (dir, pool)
}

/// Create a user with a bearer token
pub async fn create_user(pool: &SqlitePool) -> (Uuid, String) {
    let user_id = Uuid::new_v4();
    let token = format!("token-{}", Uuid::new_v4());
    register_token(pool, &token, user_id, None).await.expect("register token");
    (user_id, token)
}

/// Dictionary-backed translator; unknown words get no answer
pub struct MockTranslator {
    source: TranslationSource,
    words: HashMap<String, String>,
    pub calls: AtomicUsize,
}

impl MockTranslator {
    pub fn new(source: TranslationSource, words: &[(&str, &str)]) -> Self {
        Self {
            source,
            words: words
                .iter()
                .map(|(word, translation)| (word.to_string(), translation.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranslationProvider for MockTranslator {
    fn source(&self) -> TranslationSource {
        self.source
    }

    async fn translate(
        &self,
        word: &str,
        target_language: &str,
        _context: Option<&str>,
    ) -> Result<Option<String>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .words
            .get(&format!("{}:{}", word, target_language))
            .or_else(|| self.words.get(word))
            .cloned())
    }
}

/// Enricher that maps surface forms to lemmas and counts calls
pub struct MockEnricher {
    lemmas: HashMap<String, String>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl MockEnricher {
    pub fn new(lemmas: &[(&str, &str)]) -> Self {
        Self {
            lemmas: lemmas
                .iter()
                .map(|(word, lemma)| (word.to_string(), lemma.to_string()))
                .collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            lemmas: HashMap::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticEnricher for MockEnricher {
    async fn enhance(&self, request: &EnhancementRequest<'_>) -> Result<AiEnhancement, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Api(503, "unavailable".into()));
        }

        let lemma = self
            .lemmas
            .get(request.word)
            .cloned()
            .unwrap_or_else(|| request.word.to_string());
        Ok(AiEnhancement {
            english_definition: Some(format!("definition of {}", lemma)),
            part_of_speech: Some("verb".into()),
            pronunciation_ipa: Some(format!("/{}/", lemma)),
            lemma,
            confidence: 0.4,
            ..Default::default()
        })
    }
}

pub fn translator(words: &[(&str, &str)]) -> TranslationChain {
    TranslationChain::new().with_provider(Arc::new(MockTranslator::new(TranslationSource::Deepl, words)))
}

pub fn pipeline(pool: &SqlitePool, chain: TranslationChain, enricher: Option<Arc<MockEnricher>>) -> EnrichmentPipeline {
    let enricher = enricher.map(|e| e as Arc<dyn SemanticEnricher>);
    EnrichmentPipeline::new(pool.clone(), chain, enricher)
}

/// App state whose background jobs land in the returned receiver instead of a worker
pub fn app_state(pool: &SqlitePool, pipeline: EnrichmentPipeline) -> (AppState, mpsc::Receiver<EnrichmentJob>) {
    let (trigger, receiver) = EnrichmentTrigger::channel();
    let config = ServiceConfig {
        service_token: Some(SERVICE_TOKEN.to_string()),
        ..Default::default()
    };
    (AppState::new(pool.clone(), config, pipeline, trigger), receiver)
}

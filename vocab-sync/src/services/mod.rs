//! Service layer for vocab-sync
//!
//! Identity resolution, enrichment, duplicate merge and replication. Provider
//! clients (DeepL, Google, OpenAI) sit behind the `TranslationProvider` and
//! `SemanticEnricher` traits so tests can swap them out.

pub mod deepl_client;
pub mod enrichment_pipeline;
pub mod enrichment_worker;
pub mod google_client;
pub mod identity_resolver;
pub mod merge_engine;
pub mod openai_client;
pub mod sync_coordinator;
pub mod translation;

pub use deepl_client::DeepLClient;
pub use enrichment_pipeline::{normalize_language_code, EnhancementRequest, EnrichmentPipeline, SemanticEnricher};
pub use enrichment_worker::{
    BufferStatus, EnrichedWord, EnrichmentJob, EnrichmentTrigger, EnrichmentWorker, FailedWord, ProcessSummary,
    DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE,
};
pub use google_client::GoogleTranslateClient;
pub use identity_resolver::{CardBackfill, IdentityResolver};
pub use merge_engine::{MergeEngine, MergeReport};
pub use openai_client::{OpenAiEnricher, DEFAULT_OPENAI_MODEL};
pub use sync_coordinator::{PushOutcome, SyncCoordinator};
pub use translation::{
    resolve_translation, MachineTranslation, ProviderError, TranslationChain, TranslationProvider,
    AI_OVERRIDE_CONFIDENCE, SOURCE_LANGUAGE,
};

//! Data models for vocab-sync

pub mod dictionary;
pub mod sync;
pub mod vocabulary;

pub use dictionary::{
    AiEnhancement, Confusable, DictionaryEntry, TranslationEntry, TranslationSource, Translations,
    ENRICHMENT_VERSION,
};
pub use sync::{
    Conflict, IdRemap, PullRequest, PullResponse, PushRequest, PushResponse, Rejection, SyncChange,
    SyncOperation,
};
pub use vocabulary::{InsertOutcome, ResolvedVocabulary, VocabularyRow};

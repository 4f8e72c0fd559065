//! Per-user vocabulary rows and identity outcomes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Vocabulary row as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyRow {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Normalized surface form (trimmed, lowercased)
    pub word: String,
    /// Lemma once enrichment has run, the word itself before that
    pub stem: Option<String>,
    pub global_dictionary_id: Option<Uuid>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl VocabularyRow {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Result of inserting a row guarded by a unique index
///
/// Losing a create/create race is a normal outcome, not an error: the caller
/// receives the id of the row that won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was inserted with this id
    Created(Uuid),
    /// An equivalent active row already existed
    AlreadyExists(Uuid),
}

impl InsertOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            InsertOutcome::Created(id) | InsertOutcome::AlreadyExists(id) => *id,
        }
    }
}

/// Identity resolution result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedVocabulary {
    pub vocabulary_id: Uuid,
    pub is_new: bool,
    /// The row is active without a canonical entry and should be handed to enrichment
    pub needs_enrichment: bool,
}

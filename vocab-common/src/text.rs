//! Word normalization
//!
//! Storage and lookup use the same normalized form: trimmed and lowercased.
//! No stemming happens here; lemma resolution belongs to enrichment.

/// Normalize a word for storage and lookup
pub fn normalize(word: &str) -> String {
    word.trim().to_lowercase()
}

//! Word capture endpoints
//!
//! `POST /lookup` records a word the user selected on a web page and answers
//! with whatever is known right now. It never waits for AI enrichment: a
//! canonical entry is used only when the variant table already has one, and
//! otherwise enrichment is queued in the background.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;
use vocab_common::api::Stage;
use vocab_common::text::normalize;

use super::auth::AuthUser;
use crate::db::{cards, dictionary, encounters, sources, vocabulary};
use crate::error::{ApiError, ApiResult};
use crate::models::{DictionaryEntry, TranslationSource};
use crate::AppState;

const MAX_WORD_CHARS: usize = 100;
const MAX_SENTENCE_CHARS: usize = 500;

/// Validated lookup body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub raw_word: String,
    pub sentence: String,
    pub url: String,
    pub title: String,
}

fn required_string<'a>(body: &'a Value, field: &str) -> Result<&'a str, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))
}

/// Check the lookup body, reporting the first offending field
pub fn validate_lookup(body: &Value) -> Result<LookupRequest, ApiError> {
    let raw_word = required_string(body, "raw_word")?;
    if raw_word.chars().count() > MAX_WORD_CHARS {
        return Err(ApiError::BadRequest(format!(
            "raw_word must be max {} characters",
            MAX_WORD_CHARS
        )));
    }

    let sentence = required_string(body, "sentence")?;
    if sentence.chars().count() > MAX_SENTENCE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "sentence must be max {} characters",
            MAX_SENTENCE_CHARS
        )));
    }

    let url = required_string(body, "url")?;
    let title = required_string(body, "title")?;

    Ok(LookupRequest {
        raw_word: raw_word.to_string(),
        sentence: sentence.to_string(),
        url: url.to_string(),
        title: title.to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub vocabulary_id: Uuid,
    pub raw_word: String,
    pub lemma: String,
    pub translation: String,
    pub translation_source: TranslationSource,
    pub pronunciation: Option<String>,
    pub part_of_speech: Option<String>,
    pub english_definition: Option<String>,
    pub context_original: String,
    pub stage: String,
    pub is_new: bool,
    /// False while the canonical entry is still being produced
    pub enriched: bool,
}

/// POST /lookup
pub async fn lookup_word(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<Value>,
) -> ApiResult<Json<LookupResponse>> {
    let request = validate_lookup(&body)?;
    let word = normalize(&request.raw_word);
    let native_language = state.config.default_native_language.as_str();

    let mut entry = state.worker.pipeline().find_cached(&word).await?;
    // A cached entry without this language gets a machine translation added now
    if entry
        .as_ref()
        .is_some_and(|e| e.translation_for(native_language).is_none())
    {
        entry = Some(
            state
                .worker
                .pipeline()
                .enrich(&word, native_language, Some(&request.sentence))
                .await?,
        );
    }

    let resolved = state
        .resolver
        .resolve(user_id, &word, entry.as_ref().map(|e| e.id))
        .await?;
    state.resolver.ensure_card(user_id, resolved.vocabulary_id).await?;

    let source_id = sources::upsert_website_source(&state.db, user_id, &request.url, &request.title).await?;
    encounters::insert_encounter(
        &state.db,
        user_id,
        resolved.vocabulary_id,
        Some(source_id),
        &request.sentence,
    )
    .await?;

    let (translation, translation_source) = match entry.as_ref().and_then(|e| e.translation_for(native_language)) {
        Some(t) => (t.primary.clone(), t.source),
        None => {
            state
                .trigger
                .request(user_id, vec![resolved.vocabulary_id], native_language);
            let machine = state
                .worker
                .pipeline()
                .translator()
                .translate(&word, native_language, Some(&request.sentence))
                .await;
            (machine.translation, machine.source)
        }
    };

    let progress = cards::card_progress(&state.db, user_id, resolved.vocabulary_id).await?;
    let stage = Stage::from_card(progress.as_ref());

    info!(
        user_id = %user_id,
        vocabulary_id = %resolved.vocabulary_id,
        word = %word,
        is_new = resolved.is_new,
        enriched = entry.is_some(),
        "Word looked up"
    );

    let lemma = entry.as_ref().map_or_else(|| word.clone(), |e| e.lemma.clone());
    let DictionaryEntryFields {
        pronunciation,
        part_of_speech,
        english_definition,
    } = entry.as_ref().map(DictionaryEntryFields::from).unwrap_or_default();

    Ok(Json(LookupResponse {
        vocabulary_id: resolved.vocabulary_id,
        raw_word: request.raw_word,
        lemma,
        translation,
        translation_source,
        pronunciation,
        part_of_speech,
        english_definition,
        context_original: request.sentence,
        stage: stage.as_str().to_string(),
        is_new: resolved.is_new,
        enriched: entry.is_some(),
    }))
}

#[derive(Debug, Default)]
struct DictionaryEntryFields {
    pronunciation: Option<String>,
    part_of_speech: Option<String>,
    english_definition: Option<String>,
}

impl From<&DictionaryEntry> for DictionaryEntryFields {
    fn from(entry: &DictionaryEntry) -> Self {
        Self {
            pronunciation: entry.pronunciation_ipa.clone(),
            part_of_speech: entry.part_of_speech.clone(),
            english_definition: entry.english_definition.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchStatusQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PageWord {
    pub lemma: String,
    pub translation: String,
    pub stage: String,
}

#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub total_words: i64,
    pub page_words: Vec<PageWord>,
}

/// GET /lookup/batch-status?url=
pub async fn batch_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<BatchStatusQuery>,
) -> ApiResult<Json<BatchStatusResponse>> {
    let (enriched, unenriched) = vocabulary::count_by_enrichment(&state.db, user_id).await?;
    let native_language = state.config.default_native_language.as_str();

    let mut page_words = Vec::new();
    if let Some(url) = query.url.as_deref().filter(|u| !u.trim().is_empty()) {
        for row in vocabulary::list_for_page(&state.db, user_id, url).await? {
            let entry = match row.global_dictionary_id {
                Some(entry_id) => dictionary::load_entry(&state.db, entry_id).await?,
                None => None,
            };
            let translation = entry
                .as_ref()
                .and_then(|e| e.translation_for(native_language))
                .map(|t| t.primary.clone())
                .unwrap_or_default();
            let progress = cards::card_progress(&state.db, user_id, row.id).await?;

            page_words.push(PageWord {
                lemma: row.stem.clone().unwrap_or_else(|| row.word.clone()),
                translation,
                stage: Stage::from_card(progress.as_ref()).as_str().to_string(),
            });
        }
        debug!(user_id = %user_id, url = %url, words = page_words.len(), "Page batch status");
    }

    Ok(Json(BatchStatusResponse {
        total_words: enriched + unenriched,
        page_words,
    }))
}

/// Build lookup routes
pub fn lookup_routes() -> Router<AppState> {
    Router::new()
        .route("/lookup", post(lookup_word))
        .route("/lookup/batch-status", get(batch_status))
}

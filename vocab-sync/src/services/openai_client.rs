//! OpenAI chat-completions client for semantic enrichment
//!
//! Requests run in JSON mode and are paced by a governor rate limiter shared by
//! every caller of the client.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use super::enrichment_pipeline::{EnhancementRequest, SemanticEnricher};
use super::translation::ProviderError;
use crate::models::AiEnhancement;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const REQUESTS_PER_SECOND: u32 = 3;
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.3;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn language_name(code: &str) -> String {
    match code {
        "de" => "German".into(),
        "es" => "Spanish".into(),
        "fr" => "French".into(),
        "it" => "Italian".into(),
        "pt" => "Portuguese".into(),
        "nl" => "Dutch".into(),
        "pl" => "Polish".into(),
        "ru" => "Russian".into(),
        "ja" => "Japanese".into(),
        "zh" => "Chinese".into(),
        "ko" => "Korean".into(),
        other => other.to_uppercase(),
    }
}

fn build_prompt(request: &EnhancementRequest<'_>) -> String {
    let language = language_name(request.native_language);
    format!(
        r#"You are a vocabulary enhancement assistant for language learners.

Given an English word and optional context sentence, return a JSON object with:
- lemma: the base/dictionary form of the word. For verbs, the infinitive. For nouns, nominative singular. If the word is already in base form, return it unchanged.
- english_definition: one-sentence plain English definition
- synonyms: up to 3 English synonyms (array of strings)
- part_of_speech: noun/verb/adjective/adverb/preposition/conjunction/determiner/pronoun/interjection/other
- confusables: array of commonly confused words (max 3), each with "word" and "explanation" (one-sentence distinction in English)
- pronunciation_ipa: IPA pronunciation (e.g., /ˈwɜːrd/)
- cefr_level: A1/A2/B1/B2/C1/C2 or null if uncertain
- best_native_translation: the best {language} translation of the word as used in the context
- confidence: 0.0-1.0 indicating confidence in best_native_translation
- native_alternatives: 2-4 alternative {language} translations (NOT "{machine}", no trivial inflections, no duplicates), or [] if none

Word: {word}
Context: {context}
Machine {language} translation: {machine}"#,
        language = language,
        machine = request.machine_translation,
        word = request.word,
        context = request.context.unwrap_or("none"),
    )
}

/// Parse the model's JSON answer, filling the lemma from the word when missing
fn parse_enhancement(content: &str, word: &str) -> Result<AiEnhancement, ProviderError> {
    let mut enhancement: AiEnhancement =
        serde_json::from_str(content).map_err(|e| ProviderError::Parse(e.to_string()))?;

    enhancement.lemma = enhancement.lemma.trim().to_lowercase();
    if enhancement.lemma.is_empty() {
        enhancement.lemma = word.trim().to_lowercase();
    }
    enhancement.confidence = enhancement.confidence.clamp(0.0, 1.0);
    enhancement.native_alternatives.retain(|alt| !alt.trim().is_empty());

    Ok(enhancement)
}

/// OpenAI-backed semantic enricher
pub struct OpenAiEnricher {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl OpenAiEnricher {
    pub fn new(api_key: &str, model: Option<&str>, timeout: Duration) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("OpenAI"));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            model: model.unwrap_or(DEFAULT_OPENAI_MODEL).to_string(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl SemanticEnricher for OpenAiEnricher {
    async fn enhance(&self, request: &EnhancementRequest<'_>) -> Result<AiEnhancement, ProviderError> {
        self.rate_limiter.until_ready().await;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: build_prompt(request),
            }],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        debug!(word = %request.word, model = %self.model, "Requesting AI enhancement");

        let response = self
            .http_client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(status.as_u16(), text));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Parse("No content in OpenAI response".into()))?;

        parse_enhancement(&content, request.word)
    }
}

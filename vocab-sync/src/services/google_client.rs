//! Google Cloud Translation (v2) client, used when DeepL has no answer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::translation::{ProviderError, TranslationProvider, SOURCE_LANGUAGE};
use crate::models::TranslationSource;

const GOOGLE_TRANSLATE_URL: &str = "https://translation.googleapis.com/language/translate/v2";

#[derive(Debug, Serialize)]
struct GoogleRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    data: Option<GoogleData>,
}

#[derive(Debug, Deserialize)]
struct GoogleData {
    #[serde(default)]
    translations: Vec<GoogleTranslation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    translated_text: String,
}

impl GoogleResponse {
    fn first_translation(self) -> Option<String> {
        self.data?.translations.into_iter().next().map(|t| t.translated_text)
    }
}

pub struct GoogleTranslateClient {
    http_client: reqwest::Client,
    api_key: String,
}

impl GoogleTranslateClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("Google Translate"));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl TranslationProvider for GoogleTranslateClient {
    fn source(&self) -> TranslationSource {
        TranslationSource::Google
    }

    async fn translate(
        &self,
        word: &str,
        target_language: &str,
        _context: Option<&str>,
    ) -> Result<Option<String>, ProviderError> {
        let request = GoogleRequest {
            q: word,
            source: SOURCE_LANGUAGE,
            target: target_language,
            format: "text",
        };

        let response = self
            .http_client
            .post(GOOGLE_TRANSLATE_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(status.as_u16(), body));
        }

        let parsed: GoogleResponse = response.json().await?;
        Ok(parsed.first_translation())
    }
}

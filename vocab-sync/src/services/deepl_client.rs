//! DeepL API client (primary machine translation provider)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::translation::{ProviderError, TranslationProvider, SOURCE_LANGUAGE};
use crate::models::TranslationSource;

const DEEPL_API_URL: &str = "https://api-free.deepl.com/v2/translate";
const USER_AGENT: &str = concat!("vocab-sync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct DeepLRequest<'a> {
    text: [&'a str; 1],
    source_lang: String,
    target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    #[serde(default)]
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

/// DeepL API client
pub struct DeepLClient {
    http_client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl DeepLClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_endpoint(api_key, timeout, DEEPL_API_URL)
    }

    /// Client against a non-default endpoint (paid plan or a local stub)
    pub fn with_endpoint(api_key: &str, timeout: Duration, endpoint: &str) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("DeepL"));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl TranslationProvider for DeepLClient {
    fn source(&self) -> TranslationSource {
        TranslationSource::Deepl
    }

    async fn translate(
        &self,
        word: &str,
        target_language: &str,
        context: Option<&str>,
    ) -> Result<Option<String>, ProviderError> {
        let request = DeepLRequest {
            text: [word],
            source_lang: SOURCE_LANGUAGE.to_uppercase(),
            target_lang: target_language.to_uppercase(),
            context,
        };

        tracing::debug!(word = %word, target = %target_language, "Querying DeepL");

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(status.as_u16(), body));
        }

        let parsed: DeepLResponse = response.json().await?;
        Ok(parsed.translations.into_iter().next().map(|t| t.text))
    }
}

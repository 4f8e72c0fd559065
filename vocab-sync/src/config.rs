//! Service configuration for vocab-sync
//!
//! Resolution priority: command line → environment → TOML → compiled default.
//! The bind address arrives already merged with its environment variable by
//! clap; provider keys and the service token are resolved here.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use vocab_common::config::TomlConfig;
use vocab_common::{Error, Result};

use crate::services::{normalize_language_code, DEFAULT_OPENAI_MODEL};

pub const DEFAULT_BIND: &str = "127.0.0.1:5780";
pub const DEFAULT_NATIVE_LANGUAGE: &str = "de";
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

pub const DEEPL_KEY_ENV: &str = "DEEPL_API_KEY";
pub const GOOGLE_KEY_ENV: &str = "GOOGLE_TRANSLATE_API_KEY";
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
pub const SERVICE_TOKEN_ENV: &str = "VOCAB_SERVICE_TOKEN";

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub deepl_api_key: Option<String>,
    pub google_translate_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub service_token: Option<String>,
    pub default_native_language: String,
    pub provider_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5780)),
            deepl_api_key: None,
            google_translate_api_key: None,
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            service_token: None,
            default_native_language: DEFAULT_NATIVE_LANGUAGE.to_string(),
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }
}

impl ServiceConfig {
    /// Merge the CLI bind override, environment and TOML values
    pub fn resolve(bind_arg: Option<&str>, toml_config: &TomlConfig) -> Result<Self> {
        let bind_raw = bind_arg
            .filter(|b| is_valid_key(b))
            .or(toml_config.bind.as_deref().filter(|b| is_valid_key(b)))
            .unwrap_or(DEFAULT_BIND);
        let bind: SocketAddr = bind_raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", bind_raw, e)))?;

        let default_native_language = match toml_config.default_native_language.as_deref() {
            Some(code) if is_valid_key(code) => normalize_language_code(code)
                .map_err(|_| Error::Config(format!("Invalid default_native_language '{}'", code)))?,
            _ => DEFAULT_NATIVE_LANGUAGE.to_string(),
        };

        let openai_model = toml_config
            .openai_model
            .as_deref()
            .filter(|m| is_valid_key(m))
            .unwrap_or(DEFAULT_OPENAI_MODEL)
            .trim()
            .to_string();

        let timeout_secs = toml_config
            .provider_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS);

        Ok(Self {
            bind,
            deepl_api_key: resolve_secret("DeepL API key", DEEPL_KEY_ENV, toml_config.deepl_api_key.as_deref()),
            google_translate_api_key: resolve_secret(
                "Google Translate API key",
                GOOGLE_KEY_ENV,
                toml_config.google_translate_api_key.as_deref(),
            ),
            openai_api_key: resolve_secret("OpenAI API key", OPENAI_KEY_ENV, toml_config.openai_api_key.as_deref()),
            openai_model,
            service_token: resolve_secret("service token", SERVICE_TOKEN_ENV, toml_config.service_token.as_deref()),
            default_native_language,
            provider_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Resolve a secret from the environment, then TOML
///
/// Returns `None` when neither source has a usable value; the dependent
/// feature is then disabled rather than failing startup.
pub fn resolve_secret(name: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v)).map(str::to_string);

    if env_value.is_some() && toml_value.is_some() {
        warn!("{} found in environment and TOML config. Using environment ({}).", name, env_var);
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", name);
        return Some(value.trim().to_string());
    }
    if let Some(value) = toml_value {
        info!("{} loaded from TOML config", name);
        return Some(value.trim().to_string());
    }

    info!("{} not configured", name);
    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

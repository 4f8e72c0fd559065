//! Configuration loading and root folder resolution
//!
//! Resolution priority for every bootstrap value:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup; it is logged and the
//! compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "VOCAB_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "vocab.db";

/// Bootstrap configuration loaded from TOML
///
/// Every field is optional so that partially written files still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP bind address (e.g. "127.0.0.1:5780")
    #[serde(default)]
    pub bind: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// DeepL API key (primary machine translation provider)
    #[serde(default)]
    pub deepl_api_key: Option<String>,

    /// Google Translate API key (secondary machine translation provider)
    #[serde(default)]
    pub google_translate_api_key: Option<String>,

    /// OpenAI API key (semantic enrichment)
    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// OpenAI chat model
    #[serde(default)]
    pub openai_model: Option<String>,

    /// Token accepted for service-to-service enrichment requests
    #[serde(default)]
    pub service_token: Option<String>,

    /// Native language used when a request does not name one
    #[serde(default)]
    pub default_native_language: Option<String>,

    /// Timeout applied to every provider HTTP call
    #[serde(default)]
    pub provider_timeout_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/vocab-sync (or /var/lib/vocab-sync for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("vocab-sync"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/vocab-sync"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("vocab-sync"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/vocab-sync"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("vocab-sync"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\vocab-sync"))
    } else {
        PathBuf::from("./vocab_data")
    }
}

/// Default TOML config path for a module (`<config dir>/<module>/config.toml`)
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(module_name).join("config.toml"))
}

/// Load a TOML config file
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load a TOML config file, degrading to defaults when it is missing or invalid
pub fn load_toml_config_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        return TomlConfig::default();
    };

    if !path.exists() {
        info!("No config file at {}, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => {
            info!("Loaded config file {}", path.display());
            config
        }
        Err(e) => {
            warn!("{} - continuing with defaults", e);
            TomlConfig::default()
        }
    }
}

/// Resolves the root folder following CLI → ENV → TOML → default
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_value: None,
        }
    }

    /// Command-line override (highest priority)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Value read from the module's TOML file
    pub fn with_toml_value(mut self, path: Option<PathBuf>) -> Self {
        self.toml_value = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            return path.clone();
        }

        let default = CompiledDefaults::for_current_platform().root_folder;
        tracing::debug!(
            module = %self.module_name,
            root_folder = %default.display(),
            "Using compiled default root folder"
        );
        default
    }
}

/// Creates the root folder and derives file paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder if it does not exist yet
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

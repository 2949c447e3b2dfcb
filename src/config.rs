//! Configuration file parser for ~/.config/shelf/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::source::{HttpSource, HttpSourceOptions};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// Every field has a default, so any subset of keys can be given.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library database location. `None` means `library.db` in the config
    /// directory (`~/.config/shelf/`).
    pub database_path: Option<PathBuf>,

    /// Per-request timeout for catalogue sources, in seconds.
    pub fetch_timeout_secs: u64,

    /// Retries after a rate limit, a server error or a truncated body.
    pub max_retries: u32,

    /// Responses larger than this many bytes are rejected.
    pub max_response_bytes: usize,

    /// Catalogue sources available to `browse`.
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = HttpSourceOptions::default();
        Self {
            database_path: None,
            fetch_timeout_secs: fetch.timeout.as_secs(),
            max_retries: fetch.max_retries,
            max_response_bytes: fetch.max_response_bytes,
            sources: Vec::new(),
        }
    }
}

/// One `[[sources]]` table.
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    pub base_url: String,
    /// Sent as a bearer token when present.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_lang() -> String {
    "en".to_string()
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("lang", &self.lang)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "database_path",
        "fetch_timeout_secs",
        "max_retries",
        "max_response_bytes",
        "sources",
    ];

    /// Database file to open, falling back to `library.db` under `config_dir`.
    pub fn resolve_database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("library.db"))
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Bad source URL → `Err(ConfigError::InvalidSource)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse config text. Blank text yields defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        for source in &config.sources {
            source.parsed_base_url()?;
        }
        Ok(config)
    }

    /// Request tuning shared by every configured source.
    pub fn fetch_options(&self) -> HttpSourceOptions {
        HttpSourceOptions {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_retries: self.max_retries,
            max_response_bytes: self.max_response_bytes,
            ..HttpSourceOptions::default()
        }
    }

    /// Look up a configured source by name, case-insensitively.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Build the HTTP source for `source`.
    pub fn build_source(
        &self,
        source: &SourceConfig,
        client: reqwest::Client,
    ) -> Result<HttpSource, ConfigError> {
        let base_url = source.parsed_base_url()?;
        let mut built = HttpSource::new(&source.name, &source.lang, base_url, client)
            .with_options(self.fetch_options());
        if let Some(key) = &source.api_key {
            built = built.with_api_key(SecretString::from(key.clone()));
        }
        Ok(built)
    }
}

impl SourceConfig {
    fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSource {
            name: self.name.clone(),
            reason,
        };

        let url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        Ok(url)
    }
}

// ============================================================================
// Tests
// ============================================================================

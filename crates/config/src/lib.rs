//! Configuration loading, validation, and management for Kaputa.
//!
//! Loads configuration from `~/.kaputa/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.kaputa/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Stream replies chunk by chunk
    #[serde(default = "default_true")]
    pub stream: bool,

    /// HTTP timeout for model and search calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Chat session settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Web search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("stream", &self.stream)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("chat", &self.chat)
            .field("search", &self.search)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("enabled", &self.enabled)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("max_results", &self.max_results)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Assistant greeting seeded as the first turn of every session
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// System instruction sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_greeting() -> String {
    "Hello! I'm Kaputa. Ask me anything, or load a document to talk about it.".into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            system_prompt: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Start sessions with the web-search toggle on
    #[serde(default)]
    pub enabled: bool,

    /// Search endpoint (Brave Search compatible)
    #[serde(default = "default_search_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Results joined into the context block per turn
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_search_api_url() -> String {
    "https://api.search.brave.com/res/v1/web/search".into()
}
fn default_max_results() -> usize {
    3
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_search_api_url(),
            api_key: None,
            max_results: default_max_results(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.kaputa/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `KAPUTA_API_KEY` (highest priority)
    /// - `GEMINI_API_KEY`
    /// - `GOOGLE_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("KAPUTA_API_KEY")
                .or_else(|| lookup("GEMINI_API_KEY"))
                .or_else(|| lookup("GOOGLE_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("KAPUTA_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("KAPUTA_MODEL") {
            if let Some(provider) = self.providers.get_mut(&self.default_provider) {
                provider.default_model = None;
            }
            self.default_model = model;
        }

        if self.search.api_key.is_none() {
            self.search.api_key = lookup("KAPUTA_SEARCH_API_KEY");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kaputa")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.search.max_results == 0 {
            return Err(ConfigError::ValidationError(
                "search.max_results must be at least 1".into(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// The model for the default provider: its `[providers.<name>]`
    /// `default_model` when set, otherwise the top-level `default_model`.
    pub fn model(&self) -> &str {
        self.providers
            .get(&self.default_provider)
            .and_then(|p| p.default_model.as_deref())
            .unwrap_or(&self.default_model)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// The API key shortened for display: first 5 and last 5 characters.
    pub fn masked_api_key(&self) -> Option<String> {
        let key = self.api_key.as_deref()?;
        let chars: Vec<char> = key.chars().collect();
        if chars.len() <= 10 {
            return Some("*".repeat(chars.len()));
        }
        let head: String = chars[..5].iter().collect();
        let tail: String = chars[chars.len() - 5..].iter().collect();
        Some(format!("{head}...{tail}"))
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            stream: true,
            request_timeout_secs: default_request_timeout_secs(),
            chat: ChatConfig::default(),
            search: SearchConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

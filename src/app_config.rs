use anyhow::{Context, Result, anyhow};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::Path;

use crate::errors::ConfigError;
use crate::translation::batch::{
    ChunkLimits, DEFAULT_CONTEXT_LINES, DEFAULT_LINES_LIMIT, DEFAULT_MAX_CHUNK_CHARS, DEFAULT_TOKENS_LIMIT,
    LimitMode,
};
use crate::translation::concurrency::ProviderProfile;
use crate::translation::rate_limit::RateLimits;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Provider and generation settings
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Chunking, concurrency and retry settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Built-in hook switches
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    #[default]
    Ollama,
    OpenAI,
    Anthropic,
    /// LM Studio (OpenAI-compatible local server)
    LMStudio,
}

impl TranslationProvider {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Ollama => "Ollama",
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::LMStudio => "LM Studio",
        }
    }

    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Ollama => "ollama".to_string(),
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
            Self::LMStudio => "lmstudio".to_string(),
        }
    }

    /// Whether the provider is a remote service that needs an API key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI | Self::Anthropic)
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "lmstudio" => Ok(Self::LMStudio),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: TranslationProvider,

    #[serde(default = "String::new")]
    pub model: String,

    #[serde(default = "String::new")]
    pub api_key: String,

    /// Service URL; empty uses the provider's default
    #[serde(default = "String::new")]
    pub endpoint: String,

    /// Parallel requests; unset falls back to the provider profile
    #[serde(default)]
    pub concurrent_requests: Option<usize>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Requests per minute; unset falls back to the provider profile, 0 disables
    #[serde(default)]
    pub rate_limit: Option<u32>,

    /// Tokens per minute; unset falls back to the provider profile, 0 disables
    #[serde(default)]
    pub tokens_per_minute: Option<u64>,
}

impl ProviderConfig {
    /// Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        let (model, endpoint, timeout_secs) = match provider_type {
            TranslationProvider::Ollama => (default_ollama_model(), default_ollama_endpoint(), default_timeout_secs()),
            TranslationProvider::OpenAI => (default_openai_model(), default_openai_endpoint(), default_timeout_secs()),
            TranslationProvider::Anthropic => (
                default_anthropic_model(),
                default_anthropic_endpoint(),
                default_anthropic_timeout_secs(),
            ),
            TranslationProvider::LMStudio => {
                (default_lmstudio_model(), default_lmstudio_endpoint(), default_timeout_secs())
            }
        };
        Self {
            provider_type,
            model,
            api_key: String::new(),
            endpoint,
            concurrent_requests: None,
            timeout_secs,
            rate_limit: None,
            tokens_per_minute: None,
        }
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Available translation providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Common translation settings
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Generation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TranslationCommonConfig {
    /// System prompt template for translation
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Temperature parameter for text generation (0.0 to 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub top_p: Option<f32>,

    /// Maximum tokens the model may generate per request
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            top_p: None,
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Chunking, concurrency and retry settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Worker count; unset falls back to the provider setting, then its profile
    #[serde(default)]
    pub worker_count: Option<usize>,

    #[serde(default)]
    pub limit_mode: LimitMode,

    #[serde(default = "default_lines_limit")]
    pub lines_limit: usize,

    #[serde(default = "default_tokens_limit")]
    pub tokens_limit: usize,

    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Preceding items sent as context with each chunk
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Passes over the pending items before giving up
    #[serde(default = "default_round_limit")]
    pub round_limit: u32,

    /// Halve the chunk budget on every retry round
    #[serde(default = "default_true")]
    pub shrink_on_retry: bool,

    /// Per-request timeout; unset uses the provider's `timeout_secs`
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            limit_mode: LimitMode::default(),
            lines_limit: default_lines_limit(),
            tokens_limit: default_tokens_limit(),
            max_chunk_chars: default_max_chunk_chars(),
            context_lines: default_context_lines(),
            round_limit: default_round_limit(),
            shrink_on_retry: true,
            request_timeout_secs: None,
            autosave_interval_secs: default_autosave_interval_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn chunk_limits(&self) -> ChunkLimits {
        ChunkLimits {
            mode: self.limit_mode,
            lines: self.lines_limit,
            tokens: self.tokens_limit,
            max_chars: self.max_chunk_chars,
            context_lines: self.context_lines,
        }
    }
}

/// Built-in hook switches
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HooksConfig {
    /// Exclude blank and digits/punctuation-only items
    #[serde(default = "default_true")]
    pub blank_line_filter: bool,

    /// Restore the source's outer whitespace on translations
    #[serde(default = "default_true")]
    pub whitespace_preserver: bool,

    /// Reject empty or suspiciously short translations
    #[serde(default = "default_true")]
    pub truncation_check: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            blank_line_filter: true,
            whitespace_preserver: true,
            truncation_check: true,
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_anthropic_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

fn default_lines_limit() -> usize {
    DEFAULT_LINES_LIMIT
}

fn default_tokens_limit() -> usize {
    DEFAULT_TOKENS_LIMIT
}

fn default_max_chunk_chars() -> usize {
    DEFAULT_MAX_CHUNK_CHARS
}

fn default_context_lines() -> usize {
    DEFAULT_CONTEXT_LINES
}

fn default_round_limit() -> u32 {
    3
}

fn default_autosave_interval_secs() -> u64 {
    8
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_lmstudio_endpoint() -> String {
    // LM Studio default server (OpenAI compatible) runs on port 1234 under /v1
    "http://localhost:1234/v1".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_lmstudio_model() -> String {
    // Placeholder; users should set to the loaded model name in LM Studio
    "local-model".to_string()
}

fn default_system_prompt() -> String {
    "You are a professional translator. Translate the following text from {source_language} to {target_language}. \
     Keep the numbering and line structure of the input exactly, and put the whole translation inside the same \
     <textarea></textarea> block."
        .to_string()
}

impl Config {
    /// Load a config file, writing a default one first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            return Ok(config);
        }

        warn!("Config file not found at '{}', creating default config.", path.display());
        let config = Config::default();
        let config_json =
            serde_json::to_string_pretty(&config).context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write default config to file: {}", path.display()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required values.
    ///
    /// This is the only fatal check of a job; it runs before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::language_utils::get_language_name(&self.source_language)?;
        crate::language_utils::get_language_name(&self.target_language)?;

        let provider = self.translation.active_provider();
        if provider.provider_type.requires_api_key() && provider.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey(provider.provider_type.display_name().to_string()));
        }

        let pipeline = &self.pipeline;
        match pipeline.limit_mode {
            LimitMode::Lines if pipeline.lines_limit == 0 => {
                return Err(ConfigError::InvalidChunking("lines_limit must be at least 1".to_string()));
            }
            LimitMode::Tokens if pipeline.tokens_limit == 0 => {
                return Err(ConfigError::InvalidChunking("tokens_limit must be at least 1".to_string()));
            }
            _ => {}
        }
        if pipeline.max_chunk_chars == 0 {
            return Err(ConfigError::InvalidChunking("max_chunk_chars must be at least 1".to_string()));
        }

        if self.worker_count() == 0 {
            return Err(invalid("worker_count", "must be at least 1"));
        }
        if pipeline.round_limit == 0 {
            return Err(invalid("round_limit", "must be at least 1"));
        }
        if self.request_timeout_secs() == 0 {
            return Err(invalid("request_timeout_secs", "must be at least 1"));
        }
        if pipeline.autosave_interval_secs == 0 {
            return Err(invalid("autosave_interval_secs", "must be at least 1"));
        }
        let temperature = self.translation.common.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid("temperature", "must be between 0.0 and 2.0"));
        }

        Ok(())
    }

    /// Effective worker count: pipeline setting, then provider setting, then profile
    pub fn worker_count(&self) -> usize {
        let provider = self.translation.active_provider();
        ProviderProfile::for_provider(provider.provider_type)
            .effective_concurrent_requests(self.pipeline.worker_count.or(provider.concurrent_requests))
    }

    /// Effective request/token ceilings per minute
    pub fn rate_limits(&self) -> RateLimits {
        let provider = self.translation.active_provider();
        let profile = ProviderProfile::for_provider(provider.provider_type);
        RateLimits::per_minute(
            provider.rate_limit.or(profile.target_rpm),
            provider.tokens_per_minute.or(profile.target_tpm),
        )
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.pipeline
            .request_timeout_secs
            .unwrap_or_else(|| self.translation.active_provider().timeout_secs)
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            translation: TranslationConfig::default(),
            pipeline: PipelineConfig::default(),
            hooks: HooksConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.get_provider_config(self.provider)
    }

    pub fn get_provider_config(&self, provider_type: TranslationProvider) -> Option<&ProviderConfig> {
        self.available_providers
            .iter()
            .find(|p| p.provider_type == provider_type)
    }

    pub fn get_provider_config_mut(&mut self, provider_type: TranslationProvider) -> &mut ProviderConfig {
        let position = match self
            .available_providers
            .iter()
            .position(|p| p.provider_type == provider_type)
        {
            Some(position) => position,
            None => {
                self.available_providers.push(ProviderConfig::new(provider_type));
                self.available_providers.len() - 1
            }
        };
        &mut self.available_providers[position]
    }

    /// Active provider settings, with defaults filled in when absent or blank
    pub fn active_provider(&self) -> ProviderConfig {
        let defaults = ProviderConfig::new(self.provider);
        match self.get_active_provider_config() {
            Some(config) => {
                let mut config = config.clone();
                if config.model.is_empty() {
                    config.model = defaults.model;
                }
                if config.endpoint.is_empty() {
                    config.endpoint = defaults.endpoint;
                }
                config
            }
            None => defaults,
        }
    }

    /// Get the model for the active provider
    pub fn get_model(&self) -> String {
        self.active_provider().model
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::Ollama),
                ProviderConfig::new(TranslationProvider::OpenAI),
                ProviderConfig::new(TranslationProvider::Anthropic),
                ProviderConfig::new(TranslationProvider::LMStudio),
            ],
            common: TranslationCommonConfig::default(),
        }
    }
}

/*!
 * Tests for application configuration functionality
 */

use transkit::app_config::{Config, LogLevel, TranslationProvider};
use transkit::errors::ConfigError;
use transkit::translation::batch::LimitMode;
use transkit::translation::rate_limit::RateLimits;

use crate::common;

/// Test default configuration values
#[test]
fn test_defaultConfig_withNoParameters_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.source_language, "en");
    assert_eq!(config.target_language, "fr");
    assert_eq!(config.translation.provider, TranslationProvider::Ollama);
    assert_eq!(config.translation.available_providers.len(), 4);
    assert_eq!(config.log_level, LogLevel::Info);

    let pipeline = &config.pipeline;
    assert_eq!(pipeline.limit_mode, LimitMode::Lines);
    assert_eq!(pipeline.lines_limit, 15);
    assert_eq!(pipeline.tokens_limit, 500);
    assert_eq!(pipeline.max_chunk_chars, 6000);
    assert_eq!(pipeline.context_lines, 3);
    assert_eq!(pipeline.round_limit, 3);
    assert!(pipeline.shrink_on_retry);
    assert_eq!(pipeline.autosave_interval_secs, 8);

    assert!(config.validate().is_ok());
}

#[test]
fn test_configJson_withMissingSections_shouldFillDefaults() {
    let json = r#"{
        "source_language": "ja",
        "target_language": "en",
        "translation": {
            "provider": "anthropic",
            "available_providers": [{"type": "anthropic", "api_key": "k", "rate_limit": 10}]
        }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.pipeline.lines_limit, 15);
    assert!(config.hooks.blank_line_filter);
    let provider = config.translation.active_provider();
    assert_eq!(provider.provider_type, TranslationProvider::Anthropic);
    assert!(!provider.model.is_empty());
    assert_eq!(provider.timeout_secs, 60);
    assert_eq!(config.rate_limits().requests_per_window, Some(10));
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_withBadLanguages_shouldFail() {
    let mut config = Config::default();
    config.source_language = "xyz".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidLanguage(_))));

    config.source_language = "en".to_string();
    config.target_language = String::new();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidLanguage(_))));
}

#[test]
fn test_validate_withRemoteProviderWithoutKey_shouldFail() {
    let mut config = Config::default();
    config.translation.provider = TranslationProvider::OpenAI;
    assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey(_))));

    config.translation.get_provider_config_mut(TranslationProvider::OpenAI).api_key = "sk-test".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_withZeroLimits_shouldFail() {
    let mut config = Config::default();
    config.pipeline.lines_limit = 0;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidChunking(_))));

    // an unused budget may be zero
    config.pipeline.limit_mode = LimitMode::Tokens;
    assert!(config.validate().is_ok());

    config.pipeline.tokens_limit = 0;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidChunking(_))));
}

#[test]
fn test_validate_withZeroWorkersOrRounds_shouldFail() {
    let mut config = Config::default();
    config.pipeline.worker_count = Some(0);
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

    let mut config = Config::default();
    config.pipeline.round_limit = 0;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

    let mut config = Config::default();
    config.translation.common.temperature = 3.5;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
}

#[test]
fn test_workerCount_shouldFallBackFromPipelineToProviderToProfile() {
    let mut config = Config::default();
    assert_eq!(config.worker_count(), 4);

    config
        .translation
        .get_provider_config_mut(TranslationProvider::Ollama)
        .concurrent_requests = Some(6);
    assert_eq!(config.worker_count(), 6);

    config.pipeline.worker_count = Some(2);
    assert_eq!(config.worker_count(), 2);
}

#[test]
fn test_rateLimits_shouldUseProfileUnlessConfigured() {
    let mut config = Config::default();
    assert_eq!(config.rate_limits(), RateLimits::unlimited());

    config.translation.provider = TranslationProvider::OpenAI;
    assert_eq!(config.rate_limits().requests_per_window, Some(500));

    // zero disables the ceiling
    let openai = config.translation.get_provider_config_mut(TranslationProvider::OpenAI);
    openai.rate_limit = Some(0);
    openai.tokens_per_minute = Some(0);
    assert!(config.rate_limits().is_unlimited());
}

#[test]
fn test_requestTimeout_shouldPreferPipelineSetting() {
    let mut config = Config::default();
    assert_eq!(config.request_timeout_secs(), 60);
    config.pipeline.request_timeout_secs = Some(5);
    assert_eq!(config.request_timeout_secs(), 5);
}

#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefault() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");

    let created = Config::load_or_create(&path).unwrap();
    assert!(path.exists());

    let loaded = Config::load_or_create(&path).unwrap();
    assert_eq!(created, loaded);
}

#[test]
fn test_loadOrCreate_withInvalidJson_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(Config::load_or_create(&path).is_err());
}

#[test]
fn test_providerFromStr_shouldAcceptAnyCase() {
    assert_eq!("OpenAI".parse::<TranslationProvider>().unwrap(), TranslationProvider::OpenAI);
    assert_eq!("lmstudio".parse::<TranslationProvider>().unwrap(), TranslationProvider::LMStudio);
    assert!("gemini".parse::<TranslationProvider>().is_err());
}

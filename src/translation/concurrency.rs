/*!
 * Provider-specific concurrency tuning.
 *
 * Defaults for worker count and throughput ceilings based on provider
 * characteristics. They apply only where the configuration leaves a value
 * unset.
 */

use crate::app_config::TranslationProvider;

/// Provider-specific concurrency profile with tuned defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Maximum concurrent requests
    pub max_concurrent_requests: usize,
    /// Target requests per minute
    pub target_rpm: Option<u32>,
    /// Target tokens per minute
    pub target_tpm: Option<u64>,
}

impl ProviderProfile {
    /// Get the optimal profile for a given provider
    pub fn for_provider(provider: TranslationProvider) -> Self {
        match provider {
            // Local server, throughput is bounded by the GPU rather than a quota
            TranslationProvider::Ollama => Self {
                max_concurrent_requests: 4,
                target_rpm: None,
                target_tpm: None,
            },
            TranslationProvider::OpenAI => Self {
                max_concurrent_requests: 10,
                target_rpm: Some(500),
                target_tpm: Some(200_000),
            },
            TranslationProvider::Anthropic => Self {
                max_concurrent_requests: 5,
                target_rpm: Some(45),
                target_tpm: Some(40_000),
            },
            TranslationProvider::LMStudio => Self {
                max_concurrent_requests: 2,
                target_rpm: None,
                target_tpm: None,
            },
        }
    }

    /// Get effective concurrent requests, respecting any user override
    pub fn effective_concurrent_requests(&self, user_override: Option<usize>) -> usize {
        user_override.unwrap_or(self.max_concurrent_requests)
    }
}

/*!
 * Request clients for text-generation providers.
 *
 * Every provider sits behind the single `RequestClient` trait so the pipeline
 * never knows which service it talks to:
 * - Ollama: local LLM server (`/api/chat`)
 * - OpenAI: OpenAI-compatible chat completions
 * - Anthropic: Anthropic messages API
 * - Mock: scripted client for tests and dry runs
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{ProviderConfig, TranslationProvider};
use crate::errors::ProviderError;

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a chat request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: Some(0.3),
            top_p: None,
            max_output_tokens: 4096,
        }
    }
}

/// Outcome of one request.
///
/// `skip` marks a provider-level failure; the caller must not look at
/// `content` when it is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestReply {
    pub skip: bool,
    pub reasoning: Option<String>,
    pub content: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl RequestReply {
    pub fn success(content: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            skip: false,
            reasoning: None,
            content: Some(content.into()),
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn skipped() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    /// Fold a provider result into a reply, turning errors and empty content
    /// into skips.
    pub fn from_result(provider: &str, result: Result<RequestReply, ProviderError>) -> Self {
        match result {
            Ok(reply) if reply.content.as_deref().is_some_and(|c| !c.trim().is_empty()) => reply,
            Ok(_) => {
                log::warn!("{} returned an empty response", provider);
                Self::skipped()
            }
            Err(e) => {
                log::warn!("{} request failed: {}", provider, e);
                Self::skipped()
            }
        }
    }
}

/// Common trait for all request clients
#[async_trait]
pub trait RequestClient: Send + Sync + Debug {
    /// Send one chat request. Never fails: failures come back as `skip`.
    async fn send(&self, messages: &[ChatMessage], config: &GenerationConfig) -> RequestReply;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Split leading `<think>...</think>` reasoning off a completion.
pub fn split_reasoning(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<think>") {
        if let Some(end) = rest.find("</think>") {
            let reasoning = rest[..end].trim().to_string();
            let content = rest[end + "</think>".len()..].trim_start().to_string();
            return (Some(reasoning).filter(|r| !r.is_empty()), content);
        }
    }
    (None, text.to_string())
}

/// Map a non-success HTTP status to a provider error.
pub(crate) fn error_for_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthenticationError(body),
        429 => ProviderError::RateLimitExceeded(body),
        code => ProviderError::ApiError {
            status_code: code,
            message: body,
        },
    }
}

pub(crate) fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_connect() || error.is_timeout() {
        ProviderError::ConnectionError(error.to_string())
    } else {
        ProviderError::RequestFailed(error.to_string())
    }
}

/// Resolve `path` against a configured endpoint, or `default_base` when unset.
///
/// Endpoints without a scheme get `http://`.
pub(crate) fn endpoint_url(endpoint: &str, default_base: &str, path: &str) -> String {
    let base = endpoint.trim();
    let base = if base.is_empty() { default_base } else { base };
    let base = if base.contains("://") {
        base.to_string()
    } else {
        format!("http://{}", base)
    };
    match url::Url::parse(&base) {
        Ok(url) => format!("{}{}", url.as_str().trim_end_matches('/'), path),
        Err(e) => {
            log::warn!("Invalid endpoint '{}' ({}), using {}", base, e, default_base);
            format!("{}{}", default_base.trim_end_matches('/'), path)
        }
    }
}

/// Build the client for a configured provider.
pub fn build_client(provider: &ProviderConfig, timeout_secs: u64) -> Arc<dyn RequestClient> {
    match provider.provider_type {
        TranslationProvider::Ollama => Arc::new(ollama::Ollama::from_url(&provider.endpoint, timeout_secs)),
        TranslationProvider::OpenAI | TranslationProvider::LMStudio => Arc::new(openai::OpenAI::new(
            provider.api_key.clone(),
            provider.endpoint.clone(),
            timeout_secs,
        )),
        TranslationProvider::Anthropic => Arc::new(anthropic::Anthropic::new(
            provider.api_key.clone(),
            provider.endpoint.clone(),
            timeout_secs,
        )),
    }
}

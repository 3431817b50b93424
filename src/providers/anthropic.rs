use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    ChatMessage, GenerationConfig, RequestClient, RequestReply, Role, endpoint_url, error_for_status,
    transport_error,
};
use crate::errors::ProviderError;

pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic client for interacting with Anthropic API
#[derive(Debug)]
pub struct Anthropic {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// Full URL of the messages endpoint
    messages_url: String,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    /// System prompt, sent outside the message list
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

/// Anthropic message format
#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    pub role: String,
    pub content: String,
}

/// Token usage information
#[derive(Debug, Deserialize, Default)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub content: Vec<AnthropicContent>,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Present on `thinking` blocks
    #[serde(default)]
    pub thinking: Option<String>,
}

impl AnthropicRequest {
    /// Build a request, lifting system messages into the `system` field
    pub fn from_messages(messages: &[ChatMessage], config: &GenerationConfig) -> Self {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let conversation = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();

        Self {
            model: config.model.clone(),
            messages: conversation,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            top_p: config.top_p,
        }
    }
}

impl Anthropic {
    /// Create a new Anthropic client; an empty endpoint targets the public API
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        let endpoint = endpoint.into();
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            messages_url: endpoint_url(&endpoint, DEFAULT_ANTHROPIC_URL, "/v1/messages"),
        }
    }

    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }

    /// Complete a messages request
    pub async fn complete(&self, request: &AnthropicRequest) -> Result<AnthropicResponse, ProviderError> {
        let response = self
            .client
            .post(&self.messages_url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Anthropic API error ({}): {}", status, error_text);
            return Err(error_for_status(status, error_text));
        }

        response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

/// Collect text and thinking blocks from a response
fn into_reply(response: AnthropicResponse) -> RequestReply {
    let text: String = response
        .content
        .iter()
        .filter(|c| c.content_type == "text")
        .filter_map(|c| c.text.as_deref())
        .collect();
    let thinking: String = response
        .content
        .iter()
        .filter(|c| c.content_type == "thinking")
        .filter_map(|c| c.thinking.as_deref())
        .collect();

    RequestReply {
        skip: false,
        reasoning: Some(thinking).filter(|t| !t.is_empty()),
        content: Some(text),
        prompt_tokens: response.usage.input_tokens,
        completion_tokens: response.usage.output_tokens,
    }
}

#[async_trait]
impl RequestClient for Anthropic {
    async fn send(&self, messages: &[ChatMessage], config: &GenerationConfig) -> RequestReply {
        let request = AnthropicRequest::from_messages(messages, config);
        let result = self.complete(&request).await.map(into_reply);
        RequestReply::from_result(self.name(), result)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

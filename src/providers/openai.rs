use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    ChatMessage, GenerationConfig, RequestClient, RequestReply, endpoint_url, error_for_status,
    split_reasoning, transport_error,
};
use crate::errors::ProviderError;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI and OpenAI-compatible chat completion APIs
#[derive(Debug)]
pub struct OpenAI {
    client: Client,
    api_key: String,
    /// Full URL of the completions endpoint
    completions_url: String,
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_tokens: u32,
}

/// Token usage information
#[derive(Debug, Deserialize, Default)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning text returned by some compatible servers
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl OpenAI {
    /// Create a new client; an empty endpoint targets the public API
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        let endpoint = endpoint.into();
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            completions_url: endpoint_url(&endpoint, DEFAULT_OPENAI_URL, "/chat/completions"),
        }
    }

    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }

    /// Complete a chat request
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = CompletionRequest {
            model: &config.model,
            messages,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_output_tokens,
        };

        let mut builder = self.client.post(&self.completions_url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("OpenAI API error ({}): {}", status, error_text);
            return Err(error_for_status(status, error_text));
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

fn into_reply(response: CompletionResponse) -> Result<RequestReply, ProviderError> {
    let usage = response.usage.unwrap_or_default();
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or(ProviderError::EmptyResponse)?;
    let raw = message.content.unwrap_or_default();
    let (inline_reasoning, content) = split_reasoning(&raw);

    Ok(RequestReply {
        skip: false,
        reasoning: message.reasoning_content.or(inline_reasoning),
        content: Some(content),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    })
}

#[async_trait]
impl RequestClient for OpenAI {
    async fn send(&self, messages: &[ChatMessage], config: &GenerationConfig) -> RequestReply {
        let result = self.complete(messages, config).await.and_then(into_reply);
        RequestReply::from_result(self.name(), result)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

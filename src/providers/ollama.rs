use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    ChatMessage, GenerationConfig, RequestClient, RequestReply, endpoint_url, error_for_status,
    split_reasoning, transport_error,
};
use crate::errors::ProviderError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama client for interacting with Ollama API
#[derive(Debug)]
pub struct Ollama {
    /// Full URL of the chat endpoint
    chat_url: String,
    /// HTTP client for making requests
    client: Client,
}

/// Chat request for the Ollama API
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    /// Additional model parameters
    options: GenerationOptions,
    stream: bool,
}

/// Model parameters for a chat request
#[derive(Debug, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    /// Maximum number of tokens to generate
    num_predict: u32,
}

/// Message in a chat response
#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: String,
    /// Reasoning emitted by thinking models
    #[serde(default)]
    pub thinking: Option<String>,
}

/// Chat response from the Ollama API
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub message: ResponseMessage,
    /// Number of prompt tokens
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    /// Number of generated tokens
    #[serde(default)]
    pub eval_count: Option<u64>,
}

impl Ollama {
    /// Create a client from a base URL (`http://host:port`); empty means local default
    pub fn from_url(url: &str, timeout_secs: u64) -> Self {
        Self {
            chat_url: endpoint_url(url, DEFAULT_OLLAMA_URL, "/api/chat"),
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                // Ollama speaks HTTP/1.1
                .http1_only()
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    /// Chat with the Ollama API
    pub async fn chat(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<ChatResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages,
            options: GenerationOptions {
                temperature: config.temperature,
                top_p: config.top_p,
                num_predict: config.max_output_tokens,
            },
            stream: false,
        };

        let response = self
            .client
            .post(&self.chat_url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Ollama API error ({}): {}", status, error_text);
            return Err(error_for_status(status, error_text));
        }

        let body = response.text().await.map_err(transport_error)?;
        parse_chat_body(&body)
    }
}

/// Parse a chat body; tolerates servers that stream JSON lines despite `stream: false`.
fn parse_chat_body(body: &str) -> Result<ChatResponse, ProviderError> {
    if let Ok(parsed) = serde_json::from_str::<ChatResponse>(body) {
        return Ok(parsed);
    }

    debug!("Ollama returned a non-JSON body, trying JSON lines");
    let mut content = String::new();
    let mut thinking = String::new();
    let mut prompt_eval_count = None;
    let mut eval_count = None;
    let mut parsed_any = false;

    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let part: ChatResponse = serde_json::from_str(line).map_err(|e| ProviderError::ParseError(e.to_string()))?;
        parsed_any = true;
        content.push_str(&part.message.content);
        if let Some(t) = part.message.thinking {
            thinking.push_str(&t);
        }
        prompt_eval_count = part.prompt_eval_count.or(prompt_eval_count);
        eval_count = part.eval_count.or(eval_count);
    }

    if !parsed_any {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(ChatResponse {
        message: ResponseMessage {
            content,
            thinking: Some(thinking).filter(|t| !t.is_empty()),
        },
        prompt_eval_count,
        eval_count,
    })
}

#[async_trait]
impl RequestClient for Ollama {
    async fn send(&self, messages: &[ChatMessage], config: &GenerationConfig) -> RequestReply {
        let result = self.chat(messages, config).await.map(|response| {
            let (inline_reasoning, content) = split_reasoning(&response.message.content);
            RequestReply {
                skip: false,
                reasoning: response.message.thinking.or(inline_reasoning),
                content: Some(content),
                prompt_tokens: response.prompt_eval_count.unwrap_or(0),
                completion_tokens: response.eval_count.unwrap_or(0),
            }
        });
        RequestReply::from_result(self.name(), result)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

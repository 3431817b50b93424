/*!
 * Prompt construction.
 *
 * The engine does not know what the messages say; it asks a
 * `PromptStrategy` to wrap each encoded chunk. `DefaultPromptStrategy`
 * renders the configured system prompt and places the chunk's context lines
 * before the payload.
 */

use std::fmt::Debug;

use crate::app_config::Config;
use crate::language_utils;
use crate::providers::ChatMessage;

use super::codec;

/// Everything a strategy may use for one request
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub file_path: &'a str,
    /// Source text of the items before the chunk, oldest first
    pub context: &'a [String],
    /// Encoded container block
    pub payload: &'a str,
}

/// Turns an encoded chunk into chat messages
pub trait PromptStrategy: Send + Sync + Debug {
    fn build(&self, request: &PromptRequest<'_>) -> Vec<ChatMessage>;
}

/// Prompt template with language placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Replace `{source_language}` and `{target_language}`.
    pub fn render(&self, source_language: &str, target_language: &str) -> String {
        self.template
            .replace("{source_language}", source_language)
            .replace("{target_language}", target_language)
    }
}

/// System prompt from the config, context then payload in the user message
#[derive(Debug, Clone)]
pub struct DefaultPromptStrategy {
    system_prompt: String,
}

impl DefaultPromptStrategy {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Render the configured template with full language names
    pub fn from_config(config: &Config) -> Self {
        let source = language_name_or_code(&config.source_language);
        let target = language_name_or_code(&config.target_language);
        let template = PromptTemplate::new(&config.translation.common.system_prompt);
        Self::new(template.render(&source, &target))
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

fn language_name_or_code(code: &str) -> String {
    language_utils::get_language_name(code).unwrap_or_else(|_| code.to_string())
}

impl PromptStrategy for DefaultPromptStrategy {
    fn build(&self, request: &PromptRequest<'_>) -> Vec<ChatMessage> {
        let mut user = String::new();
        if !request.context.is_empty() {
            user.push_str("Previous lines, for context only (do not translate):\n");
            for line in request.context {
                user.push_str(&codec::neutralize_markers(line));
                user.push('\n');
            }
            user.push('\n');
        }
        user.push_str(request.payload);

        vec![ChatMessage::system(self.system_prompt.clone()), ChatMessage::user(user)]
    }
}

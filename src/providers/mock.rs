/*!
 * Mock request client for tests and dry runs.
 *
 * This module provides a client that simulates different provider behaviors:
 * - `MockClient::echo()` - Answers with the request's container block unchanged
 * - `MockClient::failing()` - Every request comes back skipped
 * - `MockClient::intermittent(n)` - Every nth request is skipped
 * - `MockClient::malformed()` - Answers without any container block
 * - `MockClient::stalling(n, ms)` - The first n requests hang for `ms`
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ChatMessage, GenerationConfig, RequestClient, RequestReply, Role};
use crate::translation::batch::estimate_tokens;

static CONTAINER_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<textarea[^>]*>.*?</textarea>").unwrap());

/// Custom answer generator
pub type Responder = Arc<dyn Fn(&[ChatMessage]) -> RequestReply + Send + Sync>;

/// Behavior mode for the mock client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Echo the request's container block back
    Echo,
    /// Skip every request
    Failing,
    /// Skip every nth request, echo the others
    Intermittent { fail_every: usize },
    /// Answer with prose and no container
    Malformed,
    /// Answer with an opened but never closed container
    Truncated,
    /// Answer with empty content
    Empty,
    /// Echo after a delay
    Slow { delay_ms: u64 },
    /// Delay only the first `stalls` requests, echo the rest at once
    Stalling { stalls: usize, delay_ms: u64 },
}

/// Mock client for exercising the pipeline without a network
#[derive(Clone)]
pub struct MockClient {
    behavior: MockBehavior,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    responder: Option<Responder>,
}

impl fmt::Debug for MockClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClient")
            .field("behavior", &self.behavior)
            .field("request_count", &self.request_count())
            .field("custom_responder", &self.responder.is_some())
            .finish()
    }
}

impl MockClient {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            responder: None,
        }
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent {
            fail_every: fail_every.max(1),
        })
    }

    pub fn malformed() -> Self {
        Self::new(MockBehavior::Malformed)
    }

    pub fn truncated() -> Self {
        Self::new(MockBehavior::Truncated)
    }

    pub fn empty() -> Self {
        Self::new(MockBehavior::Empty)
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    pub fn stalling(stalls: usize, delay_ms: u64) -> Self {
        Self::new(MockBehavior::Stalling { stalls, delay_ms })
    }

    /// Answer every request with a custom generator instead of the behavior
    pub fn with_responder(mut self, responder: impl Fn(&[ChatMessage]) -> RequestReply + Send + Sync + 'static) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Number of requests received so far (shared between clones)
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Copies of all received requests
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    /// The container block of the last user message
    pub fn container_of(messages: &[ChatMessage]) -> Option<String> {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| CONTAINER_BLOCK.find_iter(&m.content).last())
            .map(|block| block.as_str().to_string())
    }

    fn echo_reply(messages: &[ChatMessage]) -> RequestReply {
        let prompt_tokens = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        match Self::container_of(messages) {
            Some(block) => {
                let completion_tokens = estimate_tokens(&block);
                RequestReply::success(block, prompt_tokens, completion_tokens)
            }
            None => RequestReply::skipped(),
        }
    }
}

#[async_trait]
impl RequestClient for MockClient {
    async fn send(&self, messages: &[ChatMessage], _config: &GenerationConfig) -> RequestReply {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(messages.to_vec());

        if let Some(responder) = &self.responder {
            return responder(messages);
        }

        match self.behavior {
            MockBehavior::Echo => Self::echo_reply(messages),
            MockBehavior::Failing => RequestReply::skipped(),
            MockBehavior::Intermittent { fail_every } => {
                if count % fail_every == fail_every - 1 {
                    RequestReply::skipped()
                } else {
                    Self::echo_reply(messages)
                }
            }
            MockBehavior::Malformed => RequestReply::success("Sorry, I cannot help with that.", 10, 8),
            MockBehavior::Truncated => RequestReply::success("<textarea>\n1.", 10, 2),
            MockBehavior::Empty => RequestReply::from_result("mock", Ok(RequestReply::success("", 10, 0))),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Self::echo_reply(messages)
            }
            MockBehavior::Stalling { stalls, delay_ms } => {
                if count < stalls {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Self::echo_reply(messages)
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

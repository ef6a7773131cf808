//! Provider-agnostic LLM access.
//!
//! Research activities talk to chat models through [`LlmProvider`],
//! keeping analysis and synthesis logic decoupled from any particular
//! vendor SDK. The `openai` feature adds an OpenAI-compatible
//! implementation; tests use [`ScriptedProvider`], which replays seeded
//! deterministic responses so workflow replay is reproducible.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::Result;

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Message content.
    pub content: String,
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: content.to_string(),
    }
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
    }
}

/// A chat completion request (provider-agnostic).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Request JSON-formatted output.
    pub json_mode: bool,
}

impl ChatRequest {
    /// Creates a request with the given model and messages.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            json_mode: false,
        }
    }

    /// Requests JSON output.
    #[must_use]
    pub const fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// A chat completion response (provider-agnostic).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated text content.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
}

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls,
/// retries) for a specific provider while presenting a uniform
/// interface to the research activities.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"scripted"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Deterministic provider replaying scripted responses.
///
/// Responses are served in order and then cycled; a seed mixes into
/// the reported token usage so tests can distinguish runs while
/// staying fully reproducible.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    script: Vec<String>,
    seed: u64,
}

impl ScriptedProvider {
    /// Creates a provider that replays the given responses in order,
    /// cycling when exhausted.
    #[must_use]
    pub fn new(seed: u64, responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.clone().into()),
            script: responses,
            seed,
        }
    }

    /// A provider that always answers with the same content.
    #[must_use]
    pub fn constant(content: &str) -> Self {
        Self::new(0, vec![content.to_string()])
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| LlmError::Api("script mutex poisoned".to_string()))?;
        if queue.is_empty() {
            if self.script.is_empty() {
                return Err(LlmError::Api("scripted provider has no responses".to_string()).into());
            }
            queue.extend(self.script.iter().cloned());
        }
        let content = queue
            .pop_front()
            .unwrap_or_default();

        #[allow(clippy::cast_possible_truncation)]
        let prompt_tokens = (request
            .messages
            .iter()
            .map(|m| m.content.len())
            .sum::<usize>()
            / 4) as u32;
        #[allow(clippy::cast_possible_truncation)]
        let completion_tokens = (content.len() / 4) as u32 + (self.seed % 7) as u32;

        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("seed", &self.seed)
            .field("script_len", &self.script.len())
            .finish()
    }
}

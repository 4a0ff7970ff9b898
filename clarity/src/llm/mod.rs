//! Language model provider abstraction
//!
//! This module defines the `CompletionProvider` trait, which hides the hosted model behind a single
//! chat-completion call. The only production implementation talks to an OpenAI-compatible
//! `/chat/completions` endpoint.

use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage, ChatCompletionRequestSystemMessageContent,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::errors::Error;

pub mod openai;

pub use async_openai::types::chat::CreateChatCompletionRequest;

/// Create the completion provider from configuration
pub fn create_provider(config: &OpenAiConfig) -> Result<Box<dyn CompletionProvider>> {
    Ok(Box::new(openai::OpenAiProvider::new(config)?))
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur while calling the provider
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider response had no completion text")]
    EmptyCompletion,

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether another attempt might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::EmptyCompletion | LlmError::Config(_) => false,
        }
    }
}

impl From<LlmError> for Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Config(detail) => Error::Internal {
                operation: format!("configure completion provider: {detail}"),
            },
            other => Error::Upstream {
                service: "Text transformation service".to_string(),
                detail: other.to_string(),
            },
        }
    }
}

/// System instruction for a chat completion
pub fn system_message(content: impl Into<String>) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
        content: ChatCompletionRequestSystemMessageContent::Text(content.into()),
        name: None,
    })
}

/// End-user text for a chat completion
pub fn user_message(content: impl Into<String>) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
        content: ChatCompletionRequestUserMessageContent::Text(content.into()),
        name: None,
    })
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The provider's answer
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Model that actually served the request, if reported
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Abstract chat-completion interface
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run one chat completion, retrying transient failures internally
    async fn complete(&self, request: CreateChatCompletionRequest) -> Result<Completion>;
}

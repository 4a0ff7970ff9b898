//! OpenAI-compatible chat-completions client.

use async_openai::types::chat::CreateChatCompletionResponse;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{Completion, CompletionProvider, CreateChatCompletionRequest, LlmError, Result, TokenUsage};
use crate::config::OpenAiConfig;

/// Upstream error bodies are truncated to this many characters before logging
const MAX_ERROR_BODY_CHARS: usize = 500;

pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl OpenAiProvider {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.as_str().trim_end_matches('/')),
            api_key: config.api_key.as_ref().map(|k| k.trim().to_string()),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        })
    }

    async fn attempt(&self, request: &CreateChatCompletionRequest) -> Result<Completion> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body: CreateChatCompletionResponse = response.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyCompletion)?;

        Ok(Completion {
            text,
            model: Some(body.model).filter(|model| !model.is_empty()),
            usage: body.usage.map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn complete(&self, request: CreateChatCompletionRequest) -> Result<Completion> {
        let mut backoff = self.retry_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(&request).await {
                Ok(completion) => {
                    debug!(attempt, usage = ?completion.usage, "Completion succeeded");
                    return Ok(completion);
                }
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "Completion failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

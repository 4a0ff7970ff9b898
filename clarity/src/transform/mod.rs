//! Text transformations.
//!
//! A transformation rewrites a short passage in one of four directions ([`TransformationType`]) at an
//! intensity between 1 and 5 ([`Level`]). The pipeline is: validate the input, build the system
//! prompt, pick a model for the level, and make one chat-completion call through the configured
//! [`CompletionProvider`](crate::llm::CompletionProvider).

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::config::{OpenAiConfig, TransformConfig};
use crate::errors::{Error, Result};
use crate::llm::{self, CompletionProvider, CreateChatCompletionRequest, TokenUsage};

pub mod prompts;
pub mod validation;

/// Direction of a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransformationType {
    Simplify,
    Sophisticate,
    Casualise,
    Formalise,
}

impl TransformationType {
    pub const ALL: [TransformationType; 4] = [
        TransformationType::Simplify,
        TransformationType::Sophisticate,
        TransformationType::Casualise,
        TransformationType::Formalise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationType::Simplify => "simplify",
            TransformationType::Sophisticate => "sophisticate",
            TransformationType::Casualise => "casualise",
            TransformationType::Formalise => "formalise",
        }
    }
}

impl fmt::Display for TransformationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::BadRequest {
                message: format!(
                    "Invalid transformation type. Must be one of: {}",
                    Self::ALL.map(|kind| kind.as_str()).join(", ")
                ),
            })
    }
}

/// Transformation intensity, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Level(u8);

impl Level {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Level {
    fn default() -> Self {
        Level(Self::MIN)
    }
}

impl TryFrom<i64> for Level {
    type Error = i64;

    fn try_from(value: i64) -> std::result::Result<Self, i64> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Level(value as u8))
        } else {
            Err(value)
        }
    }
}

/// A validated transformation ready to send to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    pub text: String,
    pub kind: TransformationType,
    pub level: Level,
    pub is_lecture: bool,
}

impl Transformation {
    /// Validate raw request fields.
    pub fn parse(
        text: &str,
        kind: &str,
        level: Option<i64>,
        is_lecture: bool,
        config: &TransformConfig,
    ) -> Result<Self> {
        let text = validation::validate_text(text, config)?;
        let kind = kind.parse()?;
        let level = validation::validate_level(level)?;

        Ok(Self {
            text: text.to_string(),
            kind,
            level,
            is_lecture,
        })
    }
}

/// Result of a completed transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Turns validated transformations into provider calls.
#[derive(Clone)]
pub struct TextTransformer {
    provider: Arc<dyn CompletionProvider>,
    config: OpenAiConfig,
}

impl TextTransformer {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: OpenAiConfig) -> Self {
        Self { provider, config }
    }

    /// Build the exact request the provider will receive.
    pub fn build_request(&self, transformation: &Transformation) -> CreateChatCompletionRequest {
        CreateChatCompletionRequest {
            model: prompts::select_model(transformation.level, &self.config).to_string(),
            messages: vec![
                llm::system_message(prompts::system_message(
                    transformation.kind,
                    transformation.level,
                    transformation.is_lecture,
                )),
                llm::user_message(transformation.text.as_str()),
            ],
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            max_completion_tokens: Some(self.config.max_tokens),
            ..Default::default()
        }
    }

    #[instrument(skip_all, fields(kind = %transformation.kind, level = transformation.level.get(), chars = transformation.text.chars().count()))]
    pub async fn transform(&self, transformation: &Transformation) -> Result<TransformOutcome> {
        let request = self.build_request(transformation);
        let model = request.model.clone();

        let completion = self.provider.complete(request).await?;

        info!(
            model = %model,
            total_tokens = completion.usage.map(|u| u.total_tokens),
            "Transformation completed"
        );

        Ok(TransformOutcome {
            text: completion.text,
            model: completion.model.unwrap_or(model),
            usage: completion.usage,
        })
    }
}

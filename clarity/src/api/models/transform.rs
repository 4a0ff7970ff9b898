use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::limits::QuotaStatus;
use crate::llm::TokenUsage;
use crate::transform::{TransformOutcome, Transformation, TransformationType};

/// Body of `POST /api/transform`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    /// Passage to rewrite, at most 250 characters after trimming
    #[schema(example = "The mitochondria is the powerhouse of the cell.")]
    pub text: String,
    /// One of `simplify`, `sophisticate`, `casualise`, `formalise`
    #[schema(example = "simplify")]
    pub transformation_type: String,
    /// Intensity from 1 to 5, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(minimum = 1, maximum = 5)]
    pub level: Option<i64>,
    /// Preserve lecture terminology and structure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_lecture: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<TokenUsage> for UsageResponse {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    pub transformed_text: String,
    pub transformation_type: TransformationType,
    pub level: u8,
    /// Model that produced the rewrite
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageResponse>,
    /// Remaining transformation allowance, when quotas are enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<QuotaStatus>,
}

impl TransformResponse {
    pub fn new(transformation: &Transformation, outcome: TransformOutcome, quota: Option<QuotaStatus>) -> Self {
        Self {
            transformed_text: outcome.text,
            transformation_type: transformation.kind,
            level: transformation.level.get(),
            model: outcome.model,
            usage: outcome.usage.map(UsageResponse::from),
            rate_limit: quota,
        }
    }
}

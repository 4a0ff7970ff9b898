use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendVerificationRequest {
    #[schema(example = "student@example.edu")]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendVerificationResponse {
    pub message: String,
    /// Seconds until the code expires
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyCodeRequest {
    pub email: String,
    #[schema(example = "042917")]
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyCodeResponse {
    pub verified: bool,
    pub message: String,
}

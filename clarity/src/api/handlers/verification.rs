use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::info;

use crate::{
    AppState,
    api::models::verification::{SendVerificationRequest, SendVerificationResponse, VerifyCodeRequest, VerifyCodeResponse},
    email::parse_address,
    errors::{Error, Result},
};

#[utoipa::path(
    post,
    path = "/api/verification/send",
    tag = "verification",
    summary = "Email a verification code",
    request_body = SendVerificationRequest,
    responses(
        (status = 200, description = "Code sent", body = SendVerificationResponse),
        (status = 400, description = "Invalid email address"),
        (status = 500, description = "The email could not be sent")
    )
)]
pub async fn send_verification(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendVerificationRequest>, JsonRejection>,
) -> Result<Json<SendVerificationResponse>> {
    let Json(request) = payload.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    let address = parse_address(&request.email)?;

    let code = state.verification_codes.issue(&address);
    state
        .email
        .send_verification_code(&address, &code, state.verification_codes.ttl())
        .await?;

    info!("Verification code sent");
    Ok(Json(SendVerificationResponse {
        message: "Verification code sent successfully".to_string(),
        expires_in: state.verification_codes.ttl().as_secs(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/verification/verify",
    tag = "verification",
    summary = "Check a verification code",
    description = "A correct code is consumed and cannot be used again.",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Whether the code matched", body = VerifyCodeResponse),
        (status = 400, description = "Invalid email address")
    )
)]
pub async fn verify_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> Result<Json<VerifyCodeResponse>> {
    let Json(request) = payload.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    let address = parse_address(&request.email)?;

    let verified = state.verification_codes.verify(&address, &request.code);
    let message = if verified {
        "Email verified successfully"
    } else {
        "Invalid or expired verification code"
    };
    Ok(Json(VerifyCodeResponse {
        verified,
        message: message.to_string(),
    }))
}

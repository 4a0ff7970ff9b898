use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::transform::{TransformRequest, TransformResponse},
    auth::current_user::CurrentUser,
    errors::{Error, Result},
    transform::Transformation,
};

#[utoipa::path(
    post,
    path = "/api/transform",
    tag = "transform",
    summary = "Transform text",
    description = "Rewrite a short passage in the requested direction and intensity. Also served at `/transformText`.",
    request_body = TransformRequest,
    responses(
        (status = 200, description = "Transformed text", body = TransformResponse),
        (status = 400, description = "Invalid text, type or level"),
        (status = 401, description = "Missing or invalid access token"),
        (status = 429, description = "Rate limit or transformation quota exceeded"),
        (status = 502, description = "The completion provider failed")
    ),
    security(("BearerAuth" = []))
)]
pub async fn transform_text(
    State(state): State<AppState>,
    current_user: CurrentUser,
    payload: std::result::Result<Json<TransformRequest>, JsonRejection>,
) -> Result<Json<TransformResponse>> {
    let Json(request) = payload.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge { message: e.body_text() }
        } else {
            Error::BadRequest { message: e.body_text() }
        }
    })?;

    let transformation = Transformation::parse(
        &request.text,
        &request.transformation_type,
        request.level,
        request.is_lecture.unwrap_or(false),
        &state.config.transform,
    )?;

    // Counted before the provider call so failed upstream calls still use allowance
    let quota = match &state.limiters.quota {
        Some(quota) => Some(quota.consume(&current_user.id)?),
        None => None,
    };

    info!(
        user = %current_user.id,
        kind = %transformation.kind,
        level = transformation.level.get(),
        is_lecture = transformation.is_lecture,
        "Transform request"
    );

    let outcome = state.transformer.transform(&transformation).await?;
    Ok(Json(TransformResponse::new(&transformation, outcome, quota)))
}

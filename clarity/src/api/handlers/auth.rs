use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Redirect, Response},
};
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::auth::{CallbackQuery, CallbackResponse},
    auth::login,
    errors::Error,
};

/// Start the hosted login flow
#[utoipa::path(
    get,
    path = "/login",
    tag = "authentication",
    responses(
        (status = 303, description = "Redirect to the Auth0 authorize endpoint"),
        (status = 400, description = "Authentication is not configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>) -> Result<Redirect, Error> {
    let state_param = login::generate_state();
    let url = login::authorize_url(&state.config, &state_param)?;
    Ok(Redirect::to(url.as_str()))
}

/// Receive the authorization code from Auth0
#[utoipa::path(
    get,
    path = "/callback",
    tag = "authentication",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Authorization code for the frontend to exchange", body = CallbackResponse),
        (status = 400, description = "No code was returned"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn callback(Query(query): Query<CallbackQuery>) -> Result<Json<CallbackResponse>, Error> {
    if let Some(error) = query.error {
        warn!(error = %error, "Auth0 login was refused");
        return Err(Error::BadRequest {
            message: query.error_description.unwrap_or(error),
        });
    }

    let code = query.code.filter(|code| !code.is_empty()).ok_or_else(|| Error::BadRequest {
        message: "No code provided".to_string(),
    })?;

    info!("Login callback received");
    Ok(Json(CallbackResponse { code, state: query.state }))
}

/// End the Auth0 session and clear the token cookie
#[utoipa::path(
    get,
    path = "/logout",
    tag = "authentication",
    responses(
        (status = 303, description = "Redirect to the Auth0 logout endpoint"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<Response, Error> {
    let url = login::logout_url(&state.config)?;

    let cookie = format!(
        "{}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0",
        state.config.auth.cookie_name
    );
    let cookie = HeaderValue::from_str(&cookie).map_err(|e| Error::Internal {
        operation: format!("build logout cookie: {e}"),
    })?;

    let mut response = Redirect::to(url.as_str()).into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

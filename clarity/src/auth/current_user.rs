use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use serde::Serialize;
use tracing::{instrument, trace};
use utoipa::ToSchema;

use crate::{
    AppState,
    errors::{Error, Result},
    types::UserId,
};

/// Identity used when authentication is disabled.
pub const ANONYMOUS_USER: &str = "anonymous";

/// The caller of a protected route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CurrentUser {
    /// Auth0 subject, e.g. `auth0|64f...`
    #[schema(value_type = String)]
    pub id: UserId,
    pub email: Option<String>,
}

impl CurrentUser {
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_USER.to_string(),
            email: None,
        }
    }
}

/// Token from `Authorization: Bearer <token>`
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Token from the auth cookie, for browser clients
fn cookie_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if !state.config.auth.enabled {
            trace!("Authentication disabled, using anonymous user");
            return Ok(Self::anonymous());
        }

        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers, &state.config.auth.cookie_name))
            .ok_or_else(|| Error::Unauthenticated {
                message: Some("Authorization header is missing".to_string()),
            })?;

        let verifier = state.verifier.as_ref().ok_or_else(|| Error::Internal {
            operation: "verify token: authentication is enabled but no verifier is configured".to_string(),
        })?;

        let claims = verifier.verify(token).await?;
        trace!(sub = %claims.sub, "Authenticated request");
        Ok(Self {
            id: claims.sub,
            email: claims.email,
        })
    }
}

//! Request guards applied to every route.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::trace;

use crate::{
    AppState,
    config::Environment,
    errors::Error,
    limits::RateDecision,
};

pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");

/// Paths that are never rate limited
const RATE_LIMIT_EXEMPT: [&str; 6] = ["/", "/login", "/callback", "/logout", "/health", "/api/health"];

/// Routes that accept bodies larger than `limits.max_request_bytes`
const LARGE_BODY_ROUTES: [&str; 1] = ["/api/presentations/upload"];

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; frame-ancestors 'none'; object-src 'none'";

/// Best-effort client address: the first `X-Forwarded-For` hop, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn request_client_ip(request: &Request) -> String {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    client_ip(request.headers(), peer)
}

/// Adds browser hardening headers to every response.
pub async fn security_headers(State(state): State<AppState>, request: Request, next: Next) -> Response {
    // The converted slide HTML is rendered inside the frontend's iframe
    let path = request.uri().path();
    let framable = path.starts_with("/api/presentations/files/");
    // The API reference page loads its renderer from a CDN
    let strict_csp = !framable && path != "/docs";
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("strict-origin-when-cross-origin"));
    if !framable {
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    }
    if strict_csp {
        headers
            .entry(header::CONTENT_SECURITY_POLICY)
            .or_insert(HeaderValue::from_static(CONTENT_SECURITY_POLICY));
    }
    if state.config.environment == Environment::Production {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    response
}

/// Per-client rate limiting with `X-Rate-Limit-*` response headers.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = state.limiters.rate.as_ref() else {
        return next.run(request).await;
    };
    if RATE_LIMIT_EXEMPT.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let client = request_client_ip(&request);
    match limiter.check(&client) {
        RateDecision::Blocked { retry_after } => {
            let retry_after = retry_after.as_secs().max(1);
            Error::TooManyRequests {
                message: format!("Too many requests. Please try again in {retry_after} seconds."),
                retry_after: Some(retry_after),
            }
            .into_response()
        }
        RateDecision::Allowed { remaining, reset_after } => {
            trace!(client = %client, remaining, "Rate limit check passed");
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_after.as_secs()));
            response
        }
    }
}

/// Rejects oversized bodies by `Content-Length` before they are read.
pub async fn request_size_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let max = state.config.limits.max_request_bytes;
    if max == 0 || LARGE_BODY_ROUTES.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    if declared.is_some_and(|length| length > max) {
        return Error::PayloadTooLarge {
            message: format!("Request body exceeds {max} bytes"),
        }
        .into_response();
    }

    next.run(request).await
}

use axum::{Json, extract::State};

use crate::{AppState, limits::RateLimitMetrics};

#[utoipa::path(
    get,
    path = "/api/metrics",
    tag = "health",
    summary = "Rate limiter metrics",
    responses(
        (status = 200, description = "Counters since startup", body = RateLimitMetrics)
    )
)]
pub async fn rate_limit_metrics(State(state): State<AppState>) -> Json<RateLimitMetrics> {
    let metrics = state
        .limiters
        .rate
        .as_ref()
        .map(|limiter| limiter.metrics())
        .unwrap_or_default();
    Json(metrics)
}

use axum::{
    Json,
    extract::{Request, State},
};

use crate::{
    AppState,
    api::models::health::{ApiHealthResponse, DirectoriesStatus, HealthResponse, LibreOfficeStatus, RootResponse},
    middleware::request_client_ip,
};

#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    summary = "Service banner",
    responses((status = 200, description = "Service is running", body = RootResponse))
)]
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        name: "Clarity API".to_string(),
        status: "running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documentation: "/docs".to_string(),
        health: "/health".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    summary = "Dependency health",
    description = "Reports LibreOffice availability, whether a provider key is configured and the state of the data directories.",
    responses((status = 200, description = "Health report", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let soffice = state.documents.converter().soffice_path();
    let store = state.documents.store();

    Json(HealthResponse {
        status: "healthy".to_string(),
        libreoffice: LibreOfficeStatus {
            available: soffice.is_some(),
            path: soffice.map(|path| path.display().to_string()),
        },
        openai_configured: state.config.openai.is_configured(),
        directories: DirectoriesStatus {
            documents: tokio::fs::try_exists(store.documents_dir()).await.unwrap_or(false),
            temp: tokio::fs::try_exists(store.temp_dir()).await.unwrap_or(false),
        },
        environment: state.config.environment.as_str().to_string(),
        queued_conversions: state.limiters.conversions.queued(),
    })
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    summary = "Connectivity check",
    responses((status = 200, description = "Service reachable", body = ApiHealthResponse))
)]
pub async fn api_health(State(state): State<AppState>, request: Request) -> Json<ApiHealthResponse> {
    Json(ApiHealthResponse {
        status: "healthy".to_string(),
        environment: state.config.environment.as_str().to_string(),
        allowed_origins: state
            .config
            .auth
            .security
            .cors
            .allowed_origins
            .iter()
            .map(ToString::to_string)
            .collect(),
        client_ip: request_client_ip(&request),
    })
}

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RootResponse {
    pub name: String,
    pub status: String,
    pub version: String,
    pub documentation: String,
    pub health: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LibreOfficeStatus {
    pub available: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DirectoriesStatus {
    pub documents: bool,
    pub temp: bool,
}

/// Diagnostic view of the service's dependencies.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub libreoffice: LibreOfficeStatus,
    /// Whether an API key for the completion provider is set
    pub openai_configured: bool,
    pub directories: DirectoriesStatus,
    pub environment: String,
    /// Conversions waiting for or holding a LibreOffice slot
    pub queued_conversions: usize,
}

/// Lightweight check used by the frontend to confirm connectivity and CORS.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiHealthResponse {
    pub status: String,
    pub environment: String,
    pub allowed_origins: Vec<String>,
    pub client_ip: String,
}

//! OpenAPI documentation for the Clarity API, served with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, conversion, limits, transform};

/// Security scheme for protected routes (Auth0 access token).
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Auth0 access token. Include it in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_ACCESS_TOKEN\n```\n\n\
                            Browser clients may send it in the `auth_token` cookie instead.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Clarity API",
        description = "Rewrite short passages at a chosen reading level and convert lecture documents for in-browser reading."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::health::root,
        api::handlers::health::health,
        api::handlers::health::api_health,
        api::handlers::metrics::rate_limit_metrics,
        api::handlers::auth::login,
        api::handlers::auth::callback,
        api::handlers::auth::logout,
        api::handlers::transform::transform_text,
        api::handlers::presentations::upload_presentation,
        api::handlers::presentations::get_status,
        api::handlers::presentations::get_file,
        api::handlers::verification::send_verification,
        api::handlers::verification::verify_code,
    ),
    components(
        schemas(
            api::models::transform::TransformRequest,
            api::models::transform::TransformResponse,
            api::models::transform::UsageResponse,
            api::models::presentations::UploadResponse,
            api::models::health::RootResponse,
            api::models::health::HealthResponse,
            api::models::health::ApiHealthResponse,
            api::models::auth::CallbackResponse,
            api::models::verification::SendVerificationRequest,
            api::models::verification::SendVerificationResponse,
            api::models::verification::VerifyCodeRequest,
            api::models::verification::VerifyCodeResponse,
            conversion::DocumentStatus,
            conversion::DocumentState,
            conversion::DocumentFiles,
            limits::QuotaStatus,
            limits::RateLimitMetrics,
            transform::TransformationType,
        )
    ),
    tags(
        (name = "transform", description = "Text transformations"),
        (name = "presentations", description = "Lecture document upload and conversion"),
        (name = "authentication", description = "Auth0 login flow"),
        (name = "verification", description = "Email verification codes"),
        (name = "health", description = "Health checks and metrics"),
    )
)]
pub struct ApiDoc;

//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Transformations** (`/api/transform`, `/transformText`): rewrite a short passage
//! - **Presentations** (`/api/presentations/*`): upload lecture documents, poll conversion
//!   status and fetch converted files
//! - **Verification** (`/api/verification/*`): email verification codes
//! - **Authentication** (`/login`, `/callback`, `/logout`): Auth0 hosted login redirects
//! - **Health** (`/`, `/health`, `/api/health`, `/api/metrics`): liveness and diagnostics
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The rendered reference is served at
//! `/docs`.

pub mod handlers;
pub mod models;

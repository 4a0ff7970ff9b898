//! API request and response data models.
//!
//! These types define the public JSON contract. Field names follow what the browser frontend
//! already sends and expects, which is camelCase for transformations and snake_case for
//! presentations. All models are annotated with `utoipa` for the generated API docs.
//!
//! - [`transform`]: text transformation request and response
//! - [`presentations`]: upload descriptors (status documents live in [`crate::conversion`])
//! - [`health`]: liveness and diagnostic responses
//! - [`auth`]: Auth0 callback parameters
//! - [`verification`]: email verification codes

pub mod auth;
pub mod health;
pub mod presentations;
pub mod transform;
pub mod verification;

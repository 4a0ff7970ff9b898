//! HTTP request handlers for all API endpoints.
//!
//! Each handler validates its input, delegates to a service held in [`AppState`](crate::AppState)
//! and shapes the response. Errors are returned as [`crate::errors::Error`], which renders the
//! JSON error body.
//!
//! # Handler Modules
//!
//! - [`auth`]: Auth0 login, callback and logout redirects
//! - [`health`]: service banner and health checks
//! - [`metrics`]: rate limiter counters
//! - [`presentations`]: lecture upload, conversion status and converted files
//! - [`transform`]: text transformations
//! - [`verification`]: email verification codes
//!
//! # Authentication
//!
//! Handlers that take a [`CurrentUser`](crate::auth::current_user::CurrentUser) argument require
//! a valid access token; the rest are public.

pub mod auth;
pub mod health;
pub mod metrics;
pub mod presentations;
pub mod transform;
pub mod verification;

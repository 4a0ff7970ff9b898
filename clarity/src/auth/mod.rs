//! Authentication via Auth0.
//!
//! Clarity does not manage credentials itself. Browser users are sent to the tenant's hosted
//! login page by `/login`; API calls then carry the resulting access token either in an
//! `Authorization: Bearer` header or in the auth cookie. Tokens are RS256 JWTs checked against
//! the tenant's JWKS, the configured audience and the tenant issuer.
//!
//! With `auth.enabled: false` every request runs as the anonymous user. This is intended for
//! local development only.
//!
//! # Modules
//!
//! - [`current_user`]: the [`CurrentUser`](current_user::CurrentUser) extractor used by handlers
//! - [`jwks`]: key set caching and token verification
//! - [`login`]: authorize and logout URLs for the hosted login flow

pub mod current_user;
pub mod jwks;
pub mod login;

//! Verification of Auth0 access tokens against the tenant's published key set.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::errors::{Error, Result};

const CACHE_KEY: &str = "jwks";

/// Claims read from a verified access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    pub exp: i64,
}

/// Verifies RS256 tokens issued by one Auth0 tenant.
///
/// The key set is cached for `jwks_cache_ttl`. A token signed with a key id missing from the
/// cached set forces one refresh, so key rotation does not wait for the cache to expire.
pub struct TokenVerifier {
    client: reqwest::Client,
    jwks_url: Url,
    validation: Validation,
    keys: Cache<&'static str, Arc<JwkSet>>,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let jwks_url = match &config.jwks_url {
            Some(url) => url.clone(),
            None => Url::parse(&format!("https://{}/.well-known/jwks.json", config.domain)).map_err(|e| Error::Internal {
                operation: format!("build JWKS URL for domain {}: {e}", config.domain),
            })?,
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&config.audience]);
        validation.set_issuer(&[issuer(&config.domain)]);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("build JWKS client: {e}"),
            })?;

        Ok(Self {
            client,
            jwks_url,
            validation,
            keys: Cache::builder().max_capacity(1).time_to_live(config.jwks_cache_ttl).build(),
        })
    }

    /// Verify a bearer token and return its claims.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token).map_err(|e| unauthenticated(format!("Invalid token header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(unauthenticated("Invalid token algorithm".to_string()));
        }
        let kid = header
            .kid
            .ok_or_else(|| unauthenticated("Token is missing a key id".to_string()))?;

        let mut keys = self.key_set().await?;
        if keys.find(&kid).is_none() {
            debug!(kid = %kid, "Unknown signing key, refreshing key set");
            self.keys.invalidate(CACHE_KEY).await;
            keys = self.key_set().await?;
        }
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| unauthenticated("Unable to find appropriate key".to_string()))?;

        let key = DecodingKey::from_jwk(jwk).map_err(|e| Error::Internal {
            operation: format!("load signing key {kid}: {e}"),
        })?;

        let data = decode::<Claims>(token, &key, &self.validation).map_err(|e| {
            debug!(error = %e, "Token rejected");
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => unauthenticated("Token has expired".to_string()),
                jsonwebtoken::errors::ErrorKind::InvalidAudience | jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                    unauthenticated("Incorrect claims, please check the audience and issuer".to_string())
                }
                _ => unauthenticated("Unable to parse authentication token".to_string()),
            }
        })?;

        Ok(data.claims)
    }

    async fn key_set(&self) -> Result<Arc<JwkSet>> {
        self.keys
            .try_get_with(CACHE_KEY, self.fetch())
            .await
            .map_err(|e: Arc<Error>| Error::Upstream {
                service: "Identity provider".to_string(),
                detail: e.to_string(),
            })
    }

    async fn fetch(&self) -> Result<Arc<JwkSet>> {
        debug!(url = %self.jwks_url, "Fetching JWKS");
        let response = self
            .client
            .get(self.jwks_url.clone())
            .send()
            .await
            .map_err(|e| Error::Internal {
                operation: format!("fetch JWKS: {e}"),
            })?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "JWKS endpoint returned an error");
            return Err(Error::Internal {
                operation: format!("fetch JWKS: status {}", response.status()),
            });
        }

        let keys: JwkSet = response.json().await.map_err(|e| Error::Internal {
            operation: format!("parse JWKS: {e}"),
        })?;
        Ok(Arc::new(keys))
    }
}

/// Auth0 issuers carry a trailing slash
pub fn issuer(domain: &str) -> String {
    format!("https://{domain}/")
}

fn unauthenticated(message: String) -> Error {
    Error::Unauthenticated { message: Some(message) }
}

//! URLs for Auth0's hosted login and logout.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use url::Url;

use crate::config::Config;
use crate::errors::{Error, Result};

/// Opaque anti-CSRF value round-tripped through the authorize redirect.
pub fn generate_state() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// Where `/login` sends the browser.
pub fn authorize_url(config: &Config, state: &str) -> Result<Url> {
    let mut url = tenant_url(config, "authorize")?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.auth.client_id)
        .append_pair("redirect_uri", config.callback_url().as_str())
        .append_pair("scope", "openid profile email")
        .append_pair("audience", &config.auth.audience)
        .append_pair("state", state);
    Ok(url)
}

/// Where `/logout` sends the browser. Auth0 returns the user to `base_url` afterwards.
pub fn logout_url(config: &Config) -> Result<Url> {
    let mut url = tenant_url(config, "v2/logout")?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.auth.client_id)
        .append_pair("returnTo", config.base_url.as_str());
    Ok(url)
}

fn tenant_url(config: &Config, path: &str) -> Result<Url> {
    if config.auth.domain.is_empty() {
        return Err(Error::BadRequest {
            message: "Authentication is not configured".to_string(),
        });
    }
    Url::parse(&format!("https://{}/{path}", config.auth.domain)).map_err(|e| Error::Internal {
        operation: format!("build Auth0 URL: {e}"),
    })
}

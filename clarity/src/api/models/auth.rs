use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query string Auth0 appends when redirecting back after login.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by Auth0 when the login was refused
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Authorization code handed to the frontend, which exchanges it for tokens.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackResponse {
    pub code: String,
    pub state: Option<String>,
}

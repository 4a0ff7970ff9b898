//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `CLARITY_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `CLARITY_` override YAML values
//! 3. **OPENAI_API_KEY** - Special case: fills `openai.api_key` only when nothing else set it
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `CLARITY_AUTH__DOMAIN=tenant.eu.auth0.com` sets the `auth.domain` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use clarity::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `base_url`, `environment`
//! - **Authentication**: `auth.domain`, `auth.client_id`, `auth.audience` - Auth0 tenant settings
//! - **Security**: `auth.security.cors` - CORS settings
//! - **LLM**: `openai.*` - chat-completions endpoint, models and sampling parameters
//! - **Transformations**: `transform.*` - input validation rules
//! - **Conversion**: `conversion.*` - LibreOffice location, timeouts and retention
//! - **Limits**: `limits.*` - rate limiting, quotas and request sizes
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! CLARITY_PORT=8080
//! CLARITY_ENVIRONMENT=production
//! CLARITY_AUTH__CLIENT_ID=abc123
//! CLARITY_LIMITS__RATE__MAX_REQUESTS=100
//! OPENAI_API_KEY=sk-...
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CLARITY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation, so an empty file is a valid
/// development configuration (with authentication disabled).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Public URL of the application. Used as the Auth0 logout return address and as the
    /// default callback base.
    pub base_url: Url,
    /// Deployment environment. Production enables HSTS.
    pub environment: Environment,
    /// Root directory for uploaded documents and their conversions
    pub data_dir: PathBuf,
    /// Authentication configuration (Auth0)
    pub auth: AuthConfig,
    /// Chat-completions provider used for text transformations
    pub openai: OpenAiConfig,
    /// Text transformation input rules
    pub transform: TransformConfig,
    /// Document conversion via headless LibreOffice
    pub conversion: ConversionConfig,
    /// Rate limits, quotas and size limits
    pub limits: LimitsConfig,
    /// Verification email delivery
    pub email: EmailConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// Auth0 configuration.
///
/// Clarity never handles passwords: `/login` redirects to the tenant's authorize endpoint and
/// protected routes verify RS256 bearer tokens against the tenant's published key set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// When false every request is treated as an anonymous development user
    pub enabled: bool,
    /// Auth0 tenant domain, e.g. `clarity.eu.auth0.com`
    pub domain: String,
    /// Auth0 application client id
    pub client_id: String,
    /// API audience that access tokens must be issued for
    pub audience: String,
    /// Where Auth0 sends the user after login. Defaults to `{base_url}/callback`.
    pub callback_url: Option<Url>,
    /// Override for the JWKS location. Defaults to `https://{domain}/.well-known/jwks.json`.
    pub jwks_url: Option<Url>,
    /// How long a fetched key set is trusted before it is refreshed
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Name of the cookie that may carry the access token for browser clients
    pub cookie_name: String,
    /// Security settings (CORS)
    pub security: SecurityConfig,
}

/// Security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
    /// Custom headers to expose to the browser (in addition to CORS-safelisted headers)
    pub exposed_headers: Vec<String>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://clarity.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

impl std::fmt::Display for CorsOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorsOrigin::Wildcard => write!(f, "*"),
            // Browsers send origins without a trailing slash
            CorsOrigin::Url(url) => write!(f, "{}", url.as_str().trim_end_matches('/')),
        }
    }
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// OpenAI-compatible chat-completions provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenAiConfig {
    /// Base URL; requests go to `{base_url}/chat/completions`
    pub base_url: Url,
    /// API key sent as a bearer token
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model used for the middle levels (2 and 3)
    pub standard_model: String,
    /// Model used for the extreme levels (1, 4 and 5)
    pub advanced_model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Per-attempt request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retries after the first attempt for timeouts, 429s and 5xx responses
    pub max_retries: u32,
    /// Initial backoff between retries, doubled on each attempt
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl OpenAiConfig {
    /// Keys shorter than this are treated as placeholders.
    const MIN_KEY_LENGTH: usize = 20;

    pub fn is_configured(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| k.trim().len() > Self::MIN_KEY_LENGTH)
    }
}

/// Input rules for text transformations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// Maximum number of characters accepted after trimming
    pub max_text_chars: usize,
    /// Reject text containing brackets, braces, angle brackets or quotes
    pub reject_markup_characters: bool,
}

/// Headless LibreOffice conversion settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionConfig {
    /// Explicit path to the `soffice` binary. When unset the usual install locations are probed.
    pub soffice_path: Option<PathBuf>,
    /// How long a single conversion may run before the process is killed
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Also produce a cleaned HTML rendition for in-browser text selection
    pub generate_html: bool,
    /// Number of conversions that may run at the same time
    pub max_concurrent: usize,
    /// Conversions allowed to wait for a slot before uploads are refused with 429. 0 = unlimited.
    pub max_queued: usize,
    /// How long converted documents are kept before removal
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// How often the stale document sweeper runs
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Per-client request rate limit
    pub rate: RateLimitConfig,
    /// Per-user transformation quota
    pub quota: QuotaConfig,
    /// Upload limits
    pub files: FileLimitsConfig,
    /// Largest request body accepted on non-upload routes, in bytes. 0 disables the check.
    pub max_request_bytes: u64,
}

/// Sliding-window rate limit keyed by client IP.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed within one window
    pub max_requests: usize,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// How long a client is refused once it exceeds the limit
    #[serde(with = "humantime_serde")]
    pub block_duration: Duration,
}

/// Per-user transformation quota.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
    pub enabled: bool,
    pub max_requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// File limits configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLimitsConfig {
    /// Maximum file size in bytes.
    /// Set to 0 for unlimited (not recommended for production).
    /// Default: 50MB
    pub max_file_size: u64,
}

/// Email configuration for verification codes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// Note: Cannot use deny_unknown_fields here due to #[serde(flatten)] on transport
pub struct EmailConfig {
    /// Email transport method
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
    /// How long an issued verification code stays valid
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,
}

/// Email transport configuration - either SMTP or file-based for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Send emails via SMTP server
    Smtp {
        host: String,
        port: u16,
        username: String,
        #[serde(skip_serializing)]
        password: String,
        use_tls: bool,
    },
    /// Write emails to files (for development/testing)
    File { path: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_url: Url::parse("http://localhost:8000").expect("static URL is valid"),
            environment: Environment::Development,
            data_dir: PathBuf::from("data"),
            auth: AuthConfig::default(),
            openai: OpenAiConfig::default(),
            transform: TransformConfig::default(),
            conversion: ConversionConfig::default(),
            limits: LimitsConfig::default(),
            email: EmailConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domain: String::new(),
            client_id: String::new(),
            audience: String::new(),
            callback_url: None,
            jwks_url: None,
            jwks_cache_ttl: Duration::from_secs(10 * 60),
            cookie_name: "auth_token".to_string(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                CorsOrigin::Url(Url::parse("http://localhost:3000").expect("static URL is valid")), // Development frontend
            ],
            allow_credentials: true,
            max_age: Some(3600),
            exposed_headers: vec![
                "x-rate-limit-remaining".to_string(),
                "x-rate-limit-reset".to_string(),
            ],
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.openai.com/v1").expect("static URL is valid"),
            api_key: None,
            standard_model: "gpt-3.5-turbo".to_string(),
            advanced_model: "gpt-4".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 1000,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 250,
            reject_markup_characters: true,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            soffice_path: None,
            timeout: Duration::from_secs(60),
            generate_html: false,
            max_concurrent: 1,
            max_queued: 10,
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate: RateLimitConfig::default(),
            quota: QuotaConfig::default(),
            files: FileLimitsConfig::default(),
            max_request_bytes: 50 * 1024,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 50,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl Default for FileLimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            from_email: "noreply@example.com".to_string(),
            from_name: "Clarity".to_string(),
            code_ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self::File {
            path: "./emails".to_string(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.auth.enabled {
            for (field, value) in [
                ("auth.domain", &self.auth.domain),
                ("auth.client_id", &self.auth.client_id),
                ("auth.audience", &self.auth.audience),
            ] {
                if value.trim().is_empty() {
                    return Err(Error::Internal {
                        operation: format!(
                            "Config validation: authentication is enabled but {field} is not configured. \
                             Set it in the config file or via CLARITY_{} environment variable.",
                            field.replace('.', "__").to_uppercase()
                        ),
                    });
                }
            }
        }

        if self.transform.max_text_chars == 0 {
            return Err(Error::Internal {
                operation: "Config validation: transform.max_text_chars must be greater than 0".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.openai.temperature) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: openai.temperature ({}) must be between 0 and 2",
                    self.openai.temperature
                ),
            });
        }

        if self.limits.rate.enabled && (self.limits.rate.max_requests == 0 || self.limits.rate.window.is_zero()) {
            return Err(Error::Internal {
                operation: "Config validation: limits.rate.max_requests and limits.rate.window must be non-zero when rate limiting is enabled"
                    .to_string(),
            });
        }

        if self.conversion.max_concurrent == 0 {
            return Err(Error::Internal {
                operation: "Config validation: conversion.max_concurrent must be at least 1".to_string(),
            });
        }

        if self.conversion.sweep_interval.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: conversion.sweep_interval must be non-zero".to_string(),
            });
        }

        if self.conversion.timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: conversion.timeout must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // CLARITY_CONFIG names the file itself
            .merge(Env::prefixed("CLARITY_").ignore(&["config"]).split("__"))
            // The conventional key variable only fills the gap, it never overrides explicit config
            .join(Env::raw().only(&["OPENAI_API_KEY"]).map(|_| "openai.api_key".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Where Auth0 redirects back to after login
    pub fn callback_url(&self) -> Url {
        self.auth
            .callback_url
            .clone()
            .or_else(|| self.base_url.join("callback").ok())
            .unwrap_or_else(|| self.base_url.clone())
    }

    /// Directory holding one subdirectory per converted document
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }

    /// Directory holding uploads while they are being converted
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }
}

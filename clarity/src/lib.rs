//! # clarity: reading-level rewrites and lecture conversion
//!
//! `clarity` is the backend for a study aid. Authenticated users send short passages of text and
//! get them back rewritten in one of four directions (simpler, more sophisticated, more casual or
//! more formal) at an intensity between 1 and 5. Lecture slides and handouts can be uploaded and
//! are converted to PDF (and optionally cleaned HTML) by headless LibreOffice so the frontend can
//! display them and let the reader select passages to rewrite.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). There is no database: all state is
//! either in memory (rate limits, quotas, verification codes, the JWKS cache) or on disk under
//! `data_dir` (uploaded documents and their conversion status).
//!
//! ### Request Flow
//!
//! Every request passes through tracing, CORS, security headers, the per-client rate limiter and
//! a request size guard before reaching a handler. Protected handlers take a
//! [`CurrentUser`](auth::current_user::CurrentUser), which verifies the Auth0 access token.
//!
//! A transformation is validated, charged against the user's quota, turned into a chat-completion
//! request by [`transform::TextTransformer`] and sent through an [`llm::CompletionProvider`].
//!
//! An upload is streamed to a temp file and handed to [`conversion::DocumentService`], which
//! converts it in a background task and records progress in a status file the client polls.
//!
//! **Background services** run alongside the HTTP server: the stale document sweeper and a pruner
//! for rate-limit windows and expired verification codes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use clarity::{Application, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     clarity::install_crypto_provider();
//!     let args = clarity::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     clarity::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod conversion;
pub mod email;
pub mod errors;
pub mod limits;
pub mod llm;
pub mod middleware;
mod openapi;
pub mod telemetry;
pub mod transform;
pub mod types;

use crate::{
    auth::jwks::TokenVerifier,
    config::{Config, CorsOrigin},
    conversion::DocumentService,
    email::{EmailService, VerificationCodes},
    limits::Limiters,
    llm::CompletionProvider,
    openapi::ApiDoc,
    transform::TextTransformer,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderName, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Install the process-wide rustls crypto provider.
///
/// reqwest is built without a bundled provider, so this must run before the first HTTPS request.
/// Calling it more than once is harmless.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Application state shared across all request handlers.
///
/// # Construction
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .transformer(transformer)
///     .documents(documents)
///     .limiters(limiters)
///     .email(email)
///     .verification_codes(codes)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub transformer: Arc<TextTransformer>,
    pub documents: DocumentService,
    pub limiters: Limiters,
    /// Present when authentication is enabled
    pub verifier: Option<Arc<TokenVerifier>>,
    pub email: Arc<EmailService>,
    pub verification_codes: Arc<VerificationCodes>,
}

impl AppState {
    /// Build every service from configuration, using `provider` for completions.
    pub async fn from_config(config: Config, provider: Arc<dyn CompletionProvider>) -> anyhow::Result<Self> {
        let limiters = Limiters::new(&config.limits, &config.conversion);
        let documents = DocumentService::new(&config, limiters.conversions.clone());
        documents.store().init().await?;

        let verifier = if config.auth.enabled {
            Some(Arc::new(TokenVerifier::new(&config.auth)?))
        } else {
            tracing::warn!("Authentication is disabled, all requests run as the anonymous user");
            None
        };

        Ok(Self::builder()
            .transformer(Arc::new(TextTransformer::new(provider, config.openai.clone())))
            .documents(documents)
            .limiters(limiters)
            .maybe_verifier(verifier)
            .email(Arc::new(EmailService::new(&config)?))
            .verification_codes(Arc::new(VerificationCodes::new(config.email.code_ttl)))
            .config(config)
            .build())
    }
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.security.cors;

    // A literal `*` cannot be combined with credentials, so wildcard configs echo the origin back
    let allow_origin = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::mirror_request()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            origins.push(origin.to_string().parse::<HeaderValue>()?);
        }
        AllowOrigin::list(origins)
    };

    let mut exposed = vec![http::header::LOCATION, http::header::RETRY_AFTER];
    for header in &cors_config.exposed_headers {
        exposed.push(header.parse::<HeaderName>()?);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE, http::header::ACCEPT])
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(exposed);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// Layers, outermost first: tracing, CORS, security headers, rate limiting, request size guard.
/// The upload route gets its own body limit derived from `limits.files.max_file_size`.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth, health, metrics, presentations, transform, verification};

    let cors = create_cors_layer(&state.config)?;

    let max_file_size = state.config.limits.files.max_file_size;
    let upload_limit = if max_file_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        // Room for multipart boundaries and headers
        DefaultBodyLimit::max(usize::try_from(max_file_size).unwrap_or(usize::MAX).saturating_add(64 * 1024))
    };

    // Bodies without a Content-Length are still capped when extracted
    let json_limit = match state.config.limits.max_request_bytes {
        0 => DefaultBodyLimit::disable(),
        max => DefaultBodyLimit::max(usize::try_from(max).unwrap_or(usize::MAX)),
    };

    let router = Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/api/health", get(health::api_health))
        .route("/api/metrics", get(metrics::rate_limit_metrics))
        .route("/login", get(auth::login))
        .route("/callback", get(auth::callback))
        .route("/logout", get(auth::logout))
        .route("/api/transform", post(transform::transform_text))
        .route("/transformText", post(transform::transform_text))
        .route(
            "/api/presentations/upload",
            post(presentations::upload_presentation).layer(upload_limit),
        )
        .route("/api/presentations/status/{document_id}", get(presentations::get_status))
        .route("/api/presentations/files/{document_id}/{filename}", get(presentations::get_file))
        .route("/api/verification/send", post(verification::send_verification))
        .route("/api/verification/verify", post(verification::verify_code))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(json_limit)
        .layer(from_fn_with_state(state.clone(), middleware::request_size_guard))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::security_headers))
        .layer(cors)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Container for background services and their lifecycle management.
///
/// When dropped, the `drop_guard` cancels the shutdown token, signalling all tasks to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    /// In-flight conversions are abandoned on shutdown
    documents: DocumentService,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        self.documents.shutdown().await;

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// How often idle rate-limit windows and expired verification codes are dropped
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

fn setup_background_services(state: &AppState, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let conversion = &state.config.conversion;
    background_tasks.push(tokio::spawn(state.documents.clone().run_sweeper(
        conversion.retention,
        conversion.sweep_interval,
        shutdown_token.clone(),
    )));

    let rate = state.limiters.rate.clone();
    let codes = state.verification_codes.clone();
    let token = shutdown_token.clone();
    background_tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let clients = rate.as_ref().map(|limiter| limiter.prune()).unwrap_or(0);
                    let codes = codes.prune();
                    if clients > 0 || codes > 0 {
                        debug!(clients, codes, "Pruned expired limiter state");
                    }
                }
            }
        }
    }));

    info!("Background services started");
    BackgroundServices {
        background_tasks,
        documents: state.documents.clone(),
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// The Clarity server.
///
/// 1. **Create**: [`Application::new`] builds every service and starts background tasks
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves, then stops background tasks and flushes telemetry
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting Clarity with configuration: {:#?}", config);

        if !config.openai.is_configured() {
            tracing::warn!("No completion provider API key configured, transformations will fail");
        }
        let provider: Arc<dyn CompletionProvider> = Arc::from(llm::create_provider(&config.openai)?);
        let state = AppState::from_config(config, provider).await?;
        Self::from_state(state)
    }

    /// Create an application around prepared state
    pub fn from_state(state: AppState) -> anyhow::Result<Self> {
        let config = state.config.clone();
        let bg_services = setup_background_services(&state, CancellationToken::new());
        let router = build_router(state)?;

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Clarity listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        // Peer addresses feed the rate limiter when no proxy header is present
        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        auth::jwks::test_support as jwt,
        config::{ConversionConfig, EmailConfig, EmailTransportConfig},
        transform::test_support::RecordingProvider,
    };
    use axum::http::StatusCode;
    use axum_test::{
        TestServer,
        multipart::{MultipartForm, Part},
    };
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use url::Url;

    struct TestApp {
        server: TestServer,
        provider: Arc<RecordingProvider>,
        data_dir: tempfile::TempDir,
        _bg: BackgroundServices,
    }

    impl TestApp {
        fn emails_dir(&self) -> PathBuf {
            self.data_dir.path().join("emails")
        }
    }

    fn test_config(data_dir: &tempfile::TempDir) -> Config {
        let mut config = Config {
            data_dir: data_dir.path().join("data"),
            email: EmailConfig {
                transport: EmailTransportConfig::File {
                    path: data_dir.path().join("emails").to_string_lossy().into_owned(),
                },
                ..Default::default()
            },
            ..Default::default()
        };
        config.openai.api_key = Some("sk-test-key-that-is-long-enough".to_string());
        config
    }

    async fn spawn_app(configure: impl FnOnce(&mut Config), provider: RecordingProvider) -> TestApp {
        install_crypto_provider();
        let data_dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&data_dir);
        configure(&mut config);

        let provider = Arc::new(provider);
        let state = AppState::from_config(config, provider.clone()).await.unwrap();
        let (server, bg) = Application::from_state(state).unwrap().into_test_server();
        TestApp {
            server,
            provider,
            data_dir,
            _bg: bg,
        }
    }

    async fn default_app() -> TestApp {
        spawn_app(|_| {}, RecordingProvider::default()).await
    }

    #[tokio::test]
    async fn test_root_banner() {
        let app = default_app().await;
        let response = app.server.get("/").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["name"], "Clarity API");
        assert_eq!(body["status"], "running");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test_log::test(tokio::test)]
    async fn test_transform_returns_camel_case_response() {
        let app = default_app().await;

        let response = app
            .server
            .post("/api/transform")
            .json(&json!({
                "text": "  The mitochondria is the powerhouse of the cell.  ",
                "transformationType": "simplify",
                "level": 3,
            }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["transformedText"], "A rewritten passage.");
        assert_eq!(body["transformationType"], "simplify");
        assert_eq!(body["level"], 3);
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["usage"]["totalTokens"], 46);
        assert_eq!(body["rateLimit"]["requestsRemaining"], 99);

        let requests = app.provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = serde_json::to_value(&requests[0]).unwrap();
        assert_eq!(request["messages"][1]["content"], "The mitochondria is the powerhouse of the cell.");
    }

    #[tokio::test]
    async fn test_transform_alias_and_default_level() {
        let app = default_app().await;

        let response = app
            .server
            .post("/transformText")
            .json(&json!({"text": "Please send the report.", "transformationType": "formalise"}))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["level"], 1);
        assert_eq!(body["model"], "gpt-4");
    }

    #[tokio::test]
    async fn test_transform_validation_errors() {
        let app = default_app().await;

        let cases = [
            (json!({"text": "   ", "transformationType": "simplify"}), "Text cannot be empty"),
            (json!({"text": "<b>hi</b>", "transformationType": "simplify"}), "Text contains invalid characters"),
            (json!({"text": "a".repeat(251), "transformationType": "simplify"}), "Text exceeds 250 characters"),
            (json!({"text": "hello", "transformationType": "simplify", "level": 6}), "Level must be between 1 and 5"),
        ];
        for (body, detail) in cases {
            let response = app.server.post("/api/transform").json(&body).expect_failure().await;
            response.assert_status(StatusCode::BAD_REQUEST);
            assert_eq!(response.json::<Value>()["detail"], detail);
        }

        let response = app
            .server
            .post("/api/transform")
            .json(&json!({"text": "hello", "transformationType": "summarise"}))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["detail"].as_str().unwrap().starts_with("Invalid transformation type"));

        let response = app
            .server
            .post("/api/transform")
            .content_type("application/json")
            .bytes("{not json".into())
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        assert!(app.provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let app = spawn_app(
            |_| {},
            RecordingProvider {
                fail_with: Some(500),
                ..Default::default()
            },
        )
        .await;

        let response = app
            .server
            .post("/api/transform")
            .json(&json!({"text": "hello there", "transformationType": "casualise"}))
            .expect_failure()
            .await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        let detail = response.json::<Value>()["detail"].as_str().unwrap().to_string();
        assert_eq!(detail, "Text transformation service is unavailable");
        assert!(!detail.contains("exploded"));
    }

    #[tokio::test]
    async fn test_quota_exhaustion() {
        let app = spawn_app(|c| c.limits.quota.max_requests = 1, RecordingProvider::default()).await;
        let body = json!({"text": "hello there", "transformationType": "sophisticate", "level": 5});

        app.server.post("/api/transform").json(&body).await.assert_status_ok();
        let response = app.server.post("/api/transform").json(&body).expect_failure().await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert!(response.json::<Value>()["retry_after"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_and_exempts_public_paths() {
        let app = spawn_app(|c| c.limits.rate.max_requests = 2, RecordingProvider::default()).await;

        let first = app.server.get("/api/metrics").add_header("x-forwarded-for", "198.51.100.4").await;
        assert_eq!(first.headers().get("x-rate-limit-remaining").unwrap(), "1");
        assert!(first.headers().get("x-rate-limit-reset").is_some());
        app.server.get("/api/metrics").add_header("x-forwarded-for", "198.51.100.4").await;

        let blocked = app
            .server
            .get("/api/metrics")
            .add_header("x-forwarded-for", "198.51.100.4")
            .expect_failure()
            .await;
        blocked.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(blocked.headers().get("retry-after").unwrap(), "300");
        assert_eq!(blocked.json::<Value>()["retry_after"], 300);

        // Public paths and other clients are unaffected
        app.server
            .get("/health")
            .add_header("x-forwarded-for", "198.51.100.4")
            .await
            .assert_status_ok();
        app.server
            .get("/api/metrics")
            .add_header("x-forwarded-for", "198.51.100.5")
            .await
            .assert_status_ok();

        let metrics: Value = app.server.get("/api/metrics").add_header("x-forwarded-for", "198.51.100.6").await.json();
        assert_eq!(metrics["blocked_requests"], 1);
        assert_eq!(metrics["blocked_ips_count"], 1);
        assert_eq!(metrics["unique_ips"], 3);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let app = spawn_app(|c| c.limits.max_request_bytes = 64, RecordingProvider::default()).await;

        let response = app
            .server
            .post("/api/transform")
            .json(&json!({"text": "x".repeat(100), "transformationType": "simplify"}))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_security_headers() {
        let app = spawn_app(|c| c.environment = config::Environment::Production, RecordingProvider::default()).await;
        let response = app.server.get("/api/health").await;

        let headers = response.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert!(headers.get("strict-transport-security").is_some());

        let body: Value = response.json();
        assert_eq!(body["environment"], "production");
        assert_eq!(body["allowed_origins"], json!(["http://localhost:3000"]));
    }

    #[tokio::test]
    async fn test_health_reports_dependencies() {
        let app = spawn_app(
            |c| c.conversion.soffice_path = Some(PathBuf::from("/nonexistent/soffice")),
            RecordingProvider::default(),
        )
        .await;
        let body: Value = app.server.get("/health").await.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["libreoffice"]["available"], false);
        assert_eq!(body["openai_configured"], true);
        assert_eq!(body["directories"]["documents"], true);
        assert_eq!(body["directories"]["temp"], true);
    }

    #[tokio::test]
    async fn test_docs_served() {
        let app = default_app().await;
        let response = app.server.get("/docs").await;
        response.assert_status_ok();
        assert!(response.text().contains("Clarity API"));
    }

    #[tokio::test]
    async fn test_pdf_upload_completes_immediately() {
        let app = default_app().await;

        let response = app
            .server
            .post("/api/presentations/upload")
            .multipart(
                MultipartForm::new().add_part("file", Part::bytes(b"%PDF-1.4 fake".as_slice()).file_name("Week 2 Reading.pdf")),
            )
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "completed");
        assert_eq!(body["original_filename"], "Week_2_Reading.pdf");
        let id = body["document_id"].as_str().unwrap().to_string();
        assert_eq!(body["check_status_url"], format!("/api/presentations/status/{id}"));

        let pdf_url = body["files"]["pdf"].as_str().unwrap();
        let file = app.server.get(pdf_url).await;
        file.assert_status_ok();
        assert_eq!(file.headers().get("content-type").unwrap(), "application/pdf");
        assert_eq!(&file.as_bytes()[..], b"%PDF-1.4 fake");
        // The iframe source must be embeddable
        assert!(file.headers().get("x-frame-options").is_none());

        let status: Value = app.server.get(&format!("/api/presentations/status/{id}")).await.json();
        assert_eq!(status["status"], "completed");
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let app = spawn_app(|c| c.limits.files.max_file_size = 16, RecordingProvider::default()).await;

        let response = app
            .server
            .post("/api/presentations/upload")
            .multipart(MultipartForm::new().add_part("file", Part::bytes(b"keynote".as_slice()).file_name("talk.key")))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["detail"].as_str().unwrap().contains(".pptx (PowerPoint)"));

        let response = app
            .server
            .post("/api/presentations/upload")
            .multipart(MultipartForm::new().add_part("file", Part::bytes(vec![0u8; 1024]).file_name("big.pdf")))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);

        let response = app
            .server
            .post("/api/presentations/upload")
            .multipart(MultipartForm::new().add_part("file", Part::bytes(Vec::new()).file_name("empty.pdf")))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["detail"], "Uploaded file is empty");

        let response = app
            .server
            .post("/api/presentations/upload")
            .multipart(MultipartForm::new().add_text("note", "no file here"))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["detail"], "No file provided");

        // Nothing is left behind in the staging area
        let temp = app.data_dir.path().join("data").join("temp");
        assert_eq!(std::fs::read_dir(temp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_documents() {
        let app = default_app().await;
        let id = uuid::Uuid::new_v4();

        let status: Value = app.server.get(&format!("/api/presentations/status/{id}")).await.json();
        assert_eq!(status["status"], "not_found");

        app.server
            .get(&format!("/api/presentations/files/{id}/presentation.pdf"))
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);

        app.server
            .get(&format!("/api/presentations/files/{id}/.status"))
            .expect_failure()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_presentation_upload_is_converted() {
        let bin = tempfile::tempdir().unwrap();
        let soffice = conversion::soffice::test_support::fake_soffice(bin.path());
        let app = spawn_app(
            move |c| {
                c.conversion = ConversionConfig {
                    soffice_path: Some(soffice),
                    generate_html: true,
                    ..Default::default()
                }
            },
            RecordingProvider::default(),
        )
        .await;

        let body: Value = app
            .server
            .post("/api/presentations/upload")
            .multipart(MultipartForm::new().add_part("file", Part::bytes(b"pptx bytes".as_slice()).file_name("Lecture 4.pptx")))
            .await
            .json();
        assert_eq!(body["status"], "processing");
        let status_url = body["check_status_url"].as_str().unwrap().to_string();

        let mut status = Value::Null;
        for _ in 0..100 {
            status = app.server.get(&status_url).await.json();
            if status["status"] != "processing" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status["status"], "completed", "{status}");

        let html = app.server.get(status["files"]["html"].as_str().unwrap()).await;
        assert_eq!(html.headers().get("content-type").unwrap(), "text/html; charset=utf-8");
        assert!(html.text().contains("textSelection"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_fails_running_conversions() {
        let bin = tempfile::tempdir().unwrap();
        let soffice = conversion::soffice::test_support::hanging_soffice(bin.path());
        let app = spawn_app(
            move |c| {
                c.conversion = ConversionConfig {
                    soffice_path: Some(soffice),
                    ..Default::default()
                }
            },
            RecordingProvider::default(),
        )
        .await;

        let body: Value = app
            .server
            .post("/api/presentations/upload")
            .multipart(MultipartForm::new().add_part("file", Part::bytes(b"doc bytes".as_slice()).file_name("handout.docx")))
            .await
            .json();
        assert_eq!(body["status"], "processing");
        let status_url = body["check_status_url"].as_str().unwrap().to_string();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let TestApp {
            server,
            _bg: bg,
            data_dir: _data_dir,
            ..
        } = app;
        tokio::time::timeout(Duration::from_secs(5), bg.shutdown()).await.unwrap();

        let status: Value = server.get(&status_url).await.json();
        assert_eq!(status["status"], "failed");
        assert_eq!(status["error"], "Server shutting down");
    }

    #[tokio::test]
    async fn test_verification_round_trip() {
        let app = default_app().await;

        let response = app
            .server
            .post("/api/verification/send")
            .json(&json!({"email": "student@example.edu"}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["expires_in"], 600);

        let email = std::fs::read_dir(app.emails_dir()).unwrap().next().unwrap().unwrap().path();
        let contents = std::fs::read_to_string(email).unwrap();
        let code = crate::email::test_support::code_in_message(&contents).unwrap();

        let wrong: Value = app
            .server
            .post("/api/verification/verify")
            .json(&json!({"email": "student@example.edu", "code": "000000x"}))
            .await
            .json();
        assert_eq!(wrong["verified"], false);

        let right: Value = app
            .server
            .post("/api/verification/verify")
            .json(&json!({"email": "student@example.edu", "code": code}))
            .await
            .json();
        assert_eq!(right["verified"], true);

        let again: Value = app
            .server
            .post("/api/verification/verify")
            .json(&json!({"email": "student@example.edu", "code": code}))
            .await
            .json();
        assert_eq!(again["verified"], false);

        app.server
            .post("/api/verification/send")
            .json(&json!({"email": "not-an-address"}))
            .expect_failure()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    mod authenticated {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const DOMAIN: &str = "clarity.eu.auth0.com";
        const AUDIENCE: &str = "https://api.clarity.example.com";

        async fn auth_app(jwks: &MockServer) -> TestApp {
            Mock::given(method("GET"))
                .and(path("/.well-known/jwks.json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(jwt::jwks()))
                .mount(jwks)
                .await;

            let jwks_url = Url::parse(&format!("{}/.well-known/jwks.json", jwks.uri())).unwrap();
            spawn_app(
                move |c| {
                    c.base_url = Url::parse("https://clarity.example.com").unwrap();
                    c.auth.enabled = true;
                    c.auth.domain = DOMAIN.to_string();
                    c.auth.client_id = "client-123".to_string();
                    c.auth.audience = AUDIENCE.to_string();
                    c.auth.jwks_url = Some(jwks_url);
                },
                RecordingProvider::default(),
            )
            .await
        }

        fn body() -> Value {
            json!({"text": "hello there", "transformationType": "simplify"})
        }

        #[tokio::test]
        async fn test_missing_token_is_unauthorized() {
            let jwks = MockServer::start().await;
            let app = auth_app(&jwks).await;

            let response = app.server.post("/api/transform").json(&body()).expect_failure().await;
            response.assert_status(StatusCode::UNAUTHORIZED);
            assert_eq!(response.json::<Value>()["detail"], "Authorization header is missing");
        }

        #[tokio::test]
        async fn test_valid_bearer_token_is_accepted() {
            let jwks = MockServer::start().await;
            let app = auth_app(&jwks).await;
            let token = jwt::sign(jwt::KID, DOMAIN, AUDIENCE, "auth0|student", 300);

            app.server
                .post("/api/transform")
                .add_header("authorization", format!("Bearer {token}"))
                .json(&body())
                .await
                .assert_status_ok();

            // Browser clients may send the token as a cookie
            app.server
                .post("/api/transform")
                .add_header("cookie", format!("auth_token={token}"))
                .json(&body())
                .await
                .assert_status_ok();
        }

        #[tokio::test]
        async fn test_expired_token_is_unauthorized() {
            let jwks = MockServer::start().await;
            let app = auth_app(&jwks).await;
            let token = jwt::sign(jwt::KID, DOMAIN, AUDIENCE, "auth0|student", -600);

            app.server
                .post("/api/presentations/upload")
                .add_header("authorization", format!("Bearer {token}"))
                .multipart(MultipartForm::new().add_part("file", Part::bytes(b"%PDF".as_slice()).file_name("a.pdf")))
                .expect_failure()
                .await
                .assert_status(StatusCode::UNAUTHORIZED);
        }

        #[tokio::test]
        async fn test_login_and_logout_redirects() {
            let jwks = MockServer::start().await;
            let app = auth_app(&jwks).await;

            let login = app.server.get("/login").expect_failure().await;
            login.assert_status(StatusCode::SEE_OTHER);
            let location = login.headers().get("location").unwrap().to_str().unwrap().to_string();
            assert!(location.starts_with("https://clarity.eu.auth0.com/authorize?response_type=code"));
            assert!(location.contains("redirect_uri=https%3A%2F%2Fclarity.example.com%2Fcallback"));

            let logout = app.server.get("/logout").expect_failure().await;
            logout.assert_status(StatusCode::SEE_OTHER);
            assert!(
                logout.headers().get("set-cookie").unwrap().to_str().unwrap().starts_with("auth_token=;")
            );

            let callback: Value = app.server.get("/callback?code=abc&state=xyz").await.json();
            assert_eq!(callback, json!({"code": "abc", "state": "xyz"}));

            app.server
                .get("/callback?state=xyz")
                .expect_failure()
                .await
                .assert_status(StatusCode::BAD_REQUEST);
        }
    }
}

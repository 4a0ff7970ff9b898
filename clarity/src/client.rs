//! Typed HTTP client for the Clarity API.
//!
//! Used by the `clarity-cli` binary and by anything else that talks to a running server. Requests
//! that fail with a transport error or a 5xx are retried with exponential backoff. Uploaded
//! documents can be waited on with [`ClarityClient::wait_for_document`], which polls the status
//! endpoint and falls back to the conventional PDF location when the status never settles.

use reqwest::{Client, Response, StatusCode, multipart};
use serde::Deserialize;
use std::{future::Future, path::Path, time::Duration};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
    api::models::{
        presentations::UploadResponse,
        transform::{TransformRequest, TransformResponse},
    },
    conversion::{DocumentState, DocumentStatus, store},
    types::DocumentId,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {detail}")]
    Api {
        status: u16,
        detail: String,
        retry_after: Option<u64>,
    },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Transport failures and server-side errors are worth another attempt. Rate limiting is not:
    /// the block lasts minutes.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::Url(_) | ClientError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Exponential backoff for failed requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// How long to wait for a background conversion.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Consecutive failed status checks before giving up early
    pub max_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 10,
            max_failures: 3,
        }
    }
}

/// Where a waited-on document ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Completed(DocumentStatus),
    Failed(DocumentStatus),
    /// The status never settled; the PDF may still appear at this URL
    Fallback { pdf_url: Url },
}

#[derive(Debug, Clone)]
pub struct ClarityClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
    poll: PollPolicy,
}

impl ClarityClient {
    /// `base_url` may carry a path prefix, e.g. `https://example.com/clarity` behind a proxy.
    pub fn new(mut base_url: Url) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        // Without a trailing slash, joining would replace the last path segment
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Ok(Self {
            http,
            base_url,
            token: None,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
        })
    }

    /// Send `token` as a bearer credential on every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_polling(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Resolve an API path (e.g. one returned by the server) against the base URL.
    ///
    /// Paths are taken relative to the base URL's own path, so a leading `/` does not drop its prefix.
    /// Absolute URLs are returned unchanged.
    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn with_retry_loop<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    warn!(operation, attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "Request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self, request), fields(kind = %request.transformation_type))]
    pub async fn transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        let url = self.url("/api/transform")?;
        self.with_retry_loop("transform", || async {
            let response = self.authorize(self.http.post(url.clone())).json(request).send().await?;
            Ok(check(response).await?.json().await?)
        })
        .await
    }

    /// Upload a lecture document from disk.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn upload(&self, path: &Path) -> Result<UploadResponse> {
        let url = self.url("/api/presentations/upload")?;
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("document")
            .to_string();
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        debug!(size = bytes.len(), mime = %mime, "Uploading document");

        self.with_retry_loop("upload", || async {
            let part = multipart::Part::bytes(bytes.clone())
                .file_name(filename.clone())
                .mime_str(mime.as_ref())?;
            let form = multipart::Form::new().part("file", part);
            let response = self.authorize(self.http.post(url.clone())).multipart(form).send().await?;
            Ok(check(response).await?.json().await?)
        })
        .await
    }

    pub async fn status(&self, document_id: DocumentId) -> Result<DocumentStatus> {
        let url = self.url(&store::status_url(document_id))?;
        self.with_retry_loop("status", || async {
            let response = self.authorize(self.http.get(url.clone())).send().await?;
            Ok(check(response).await?.json().await?)
        })
        .await
    }

    /// Poll until the conversion completes or fails.
    ///
    /// Polls every `interval`, at most `max_attempts` times. When attempts run out, or status
    /// checks keep failing, returns the URL the PDF is published at once conversion finishes.
    #[instrument(skip(self))]
    pub async fn wait_for_document(&self, document_id: DocumentId) -> Result<DocumentOutcome> {
        let mut failures = 0;

        for attempt in 1..=self.poll.max_attempts {
            tokio::time::sleep(self.poll.interval).await;

            match self.status_once(document_id).await {
                Ok(status) => {
                    failures = 0;
                    match status.status {
                        DocumentState::Completed => {
                            info!(attempt, "Document converted");
                            return Ok(DocumentOutcome::Completed(status));
                        }
                        DocumentState::Failed => {
                            warn!(attempt, error = ?status.error, "Document conversion failed");
                            return Ok(DocumentOutcome::Failed(status));
                        }
                        DocumentState::Processing | DocumentState::NotFound => {
                            debug!(attempt, status = ?status.status, "Document not ready");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(attempt, failures, error = %e, "Status check failed");
                    if failures >= self.poll.max_failures {
                        break;
                    }
                }
            }
        }

        let pdf_url = self.url(&store::file_url(document_id, store::PDF_FILE))?;
        warn!(url = %pdf_url, "Gave up waiting for conversion status, falling back to the PDF location");
        Ok(DocumentOutcome::Fallback { pdf_url })
    }

    // Polling has its own failure budget, so status checks are not retried individually
    async fn status_once(&self, document_id: DocumentId) -> Result<DocumentStatus> {
        let url = self.url(&store::status_url(document_id))?;
        let response = self.authorize(self.http.get(url)).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Fetch a converted file by API path (e.g. `files.pdf` from a status) or absolute URL.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url(path)?;
        self.with_retry_loop("download", || async {
            let response = self.authorize(self.http.get(url.clone())).send().await?;
            Ok(check(response).await?.bytes().await?.to_vec())
        })
        .await
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = self.url("/health")?;
        self.with_retry_loop("health", || async {
            let response = self.http.get(url.clone()).send().await?;
            Ok(check(response).await?.json().await?)
        })
        .await
    }
}

/// Turn non-success responses into [`ClientError::Api`] using the server's `detail` message.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (detail, retry_after) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.detail, body.retry_after),
        Err(_) if text.is_empty() => (status.canonical_reason().unwrap_or("Unknown error").to_string(), None),
        Err(_) => (text, None),
    };

    if status == StatusCode::UNAUTHORIZED {
        debug!("Access token rejected, the user needs to sign in again");
    }

    Err(ClientError::Api {
        status: status.as_u16(),
        detail,
        retry_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{bearer_token, header_exists, method, path},
    };

    fn client(server: &MockServer) -> ClarityClient {
        crate::install_crypto_provider();
        ClarityClient::new(Url::parse(&server.uri()).unwrap())
            .unwrap()
            .with_retry(RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(5),
            })
            .with_polling(PollPolicy {
                interval: Duration::from_millis(5),
                max_attempts: 10,
                max_failures: 3,
            })
    }

    fn status_body(id: Uuid, status: &str) -> serde_json::Value {
        json!({"document_id": id, "status": status})
    }

    fn request() -> TransformRequest {
        TransformRequest {
            text: "The results were statistically significant.".to_string(),
            transformation_type: "simplify".to_string(),
            level: Some(2),
            is_lecture: None,
        }
    }

    #[tokio::test]
    async fn test_transform_sends_token_and_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/transform"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "busy"})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/transform"))
            .and(bearer_token("token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "transformedText": "The results mattered.",
                "transformationType": "simplify",
                "level": 2,
                "model": "gpt-3.5-turbo",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server).with_token("token-123").transform(&request()).await.unwrap();
        assert_eq!(response.transformed_text, "The results mattered.");
        assert_eq!(response.level, 2);
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/transform"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"detail": "Slow down", "retry_after": 300})))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).transform(&request()).await.unwrap_err();
        match err {
            ClientError::Api {
                status,
                detail,
                retry_after,
            } => {
                assert_eq!(status, 429);
                assert_eq!(detail, "Slow down");
                assert_eq!(retry_after, Some(300));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_sends_multipart_file() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/api/presentations/upload"))
            .and(header_exists("content-type"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "document_id": id,
                "status": "processing",
                "check_status_url": format!("/api/presentations/status/{id}"),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("week1.pptx");
        std::fs::write(&file, b"slides").unwrap();

        let response = client(&server).upload(&file).await.unwrap();
        assert_eq!(response.document_id, id);
        assert_eq!(response.status, DocumentState::Processing);

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains(r#"filename="week1.pptx""#));
        assert!(body.contains("slides"));
    }

    #[tokio::test]
    async fn test_wait_stops_on_completion() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        let status_path = format!("/api/presentations/status/{id}");
        Mock::given(method("GET"))
            .and(path(status_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(id, "processing")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(status_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "document_id": id,
                "status": "completed",
                "files": {"pdf": format!("/api/presentations/files/{id}/presentation.pdf")},
            })))
            .expect(1)
            .mount(&server)
            .await;

        match client(&server).wait_for_document(id).await.unwrap() {
            DocumentOutcome::Completed(status) => {
                assert_eq!(status.files.unwrap().pdf, format!("/api/presentations/files/{id}/presentation.pdf"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_stops_on_failure() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/api/presentations/status/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "document_id": id,
                "status": "failed",
                "error": "Conversion timed out",
            })))
            .expect(1)
            .mount(&server)
            .await;

        match client(&server).wait_for_document(id).await.unwrap() {
            DocumentOutcome::Failed(status) => assert_eq!(status.error.as_deref(), Some("Conversion timed out")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_falls_back_after_max_attempts() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/api/presentations/status/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(id, "processing")))
            .expect(10)
            .mount(&server)
            .await;

        let outcome = client(&server).wait_for_document(id).await.unwrap();
        let expected = Url::parse(&format!("{}/api/presentations/files/{id}/presentation.pdf", server.uri())).unwrap();
        assert_eq!(outcome, DocumentOutcome::Fallback { pdf_url: expected });
    }

    #[test]
    fn test_base_url_path_prefix_is_kept() {
        crate::install_crypto_provider();
        for base in ["https://uni.example.com/clarity", "https://uni.example.com/clarity/"] {
            let client = ClarityClient::new(Url::parse(base).unwrap()).unwrap();
            assert_eq!(
                client.url("/api/transform").unwrap().as_str(),
                "https://uni.example.com/clarity/api/transform"
            );
            assert_eq!(
                client.url("api/presentations/status/abc").unwrap().as_str(),
                "https://uni.example.com/clarity/api/presentations/status/abc"
            );
        }

        let client = ClarityClient::new(Url::parse("https://uni.example.com").unwrap()).unwrap();
        assert_eq!(client.url("/health").unwrap().as_str(), "https://uni.example.com/health");
        let absolute = "https://cdn.example.com/presentation.pdf";
        assert_eq!(client.url(absolute).unwrap().as_str(), absolute);
    }

    #[tokio::test]
    async fn test_wait_falls_back_after_repeated_failures() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/api/presentations/status/{id}")))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = client(&server).wait_for_document(id).await.unwrap();
        assert!(matches!(outcome, DocumentOutcome::Fallback { .. }));
    }
}

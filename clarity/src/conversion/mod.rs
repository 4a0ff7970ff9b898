//! Lecture document conversion.
//!
//! Uploads are staged under the temp directory and converted in a background task by headless
//! LibreOffice. Progress is written to `status.json` in the document's directory; clients poll
//! the status endpoint until it reports `completed` or `failed`. PDFs need no conversion and are
//! published immediately.
//!
//! - [`filename`]: accepted file types and filename sanitising
//! - [`soffice`]: locating and running LibreOffice with a deadline
//! - [`html`]: making LibreOffice's HTML embeddable
//! - [`store`]: on-disk layout and status documents

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::limits::{ConversionLimiter, QueuedConversion};
use crate::types::{DocumentId, abbrev_uuid};

/// Recorded for conversions still running when the server stops
const SHUTDOWN_ERROR: &str = "Server shutting down";

pub mod filename;
pub mod html;
pub mod soffice;
pub mod store;

pub use filename::{DocumentKind, sanitize_filename};
pub use soffice::{ConversionError, DocumentConverter, OutputFormat};
pub use store::{DocumentFiles, DocumentState, DocumentStatus, DocumentStore};

/// A staged upload ready for conversion.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub id: DocumentId,
    pub kind: DocumentKind,
    /// Sanitised original filename
    pub filename: String,
    pub path: PathBuf,
}

/// Coordinates staging, conversion and status reporting.
#[derive(Clone)]
pub struct DocumentService {
    store: DocumentStore,
    converter: DocumentConverter,
    limiter: Arc<ConversionLimiter>,
    generate_html: bool,
    /// Origin the selection script in converted HTML posts to
    embedder_origin: String,
    jobs: TaskTracker,
    shutdown: CancellationToken,
}

impl DocumentService {
    pub fn new(config: &Config, limiter: Arc<ConversionLimiter>) -> Self {
        let soffice = soffice::locate_soffice(config.conversion.soffice_path.as_deref());
        match &soffice {
            Some(path) => info!(path = %path.display(), "Found LibreOffice"),
            None => warn!("LibreOffice not found, only PDF uploads can be processed"),
        }

        let embedder_origin = config
            .auth
            .security
            .cors
            .allowed_origins
            .first()
            .map(|origin| origin.to_string())
            .unwrap_or_else(|| "*".to_string());

        Self {
            store: DocumentStore::new(config.documents_dir(), config.temp_dir()),
            converter: DocumentConverter::new(soffice, config.conversion.timeout),
            limiter,
            generate_html: config.conversion.generate_html,
            embedder_origin,
            jobs: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn converter(&self) -> &DocumentConverter {
        &self.converter
    }

    /// Accept a staged upload.
    ///
    /// PDFs are published straight away. Everything else gets a `processing` status and a
    /// background conversion; the returned status tells the client where to poll.
    pub async fn submit(&self, upload: StagedUpload) -> Result<DocumentStatus> {
        if upload.kind == DocumentKind::Pdf {
            return self.publish_pdf(upload).await;
        }

        if self.converter.soffice_path().is_none() {
            remove_quietly(&upload.path).await;
            return Err(Error::Internal {
                operation: "convert document: LibreOffice is not installed".to_string(),
            });
        }

        let ticket = match self.limiter.enqueue() {
            Ok(ticket) => ticket,
            Err(e) => {
                remove_quietly(&upload.path).await;
                return Err(e);
            }
        };

        let status = DocumentStatus::processing(upload.id, &upload.filename);
        self.store.write_status(&status).await?;

        let service = self.clone();
        let span = info_span!("convert_document", document_id = %abbrev_uuid(&upload.id));
        self.jobs.spawn(async move { service.process(upload, ticket).await }.instrument(span));

        Ok(status)
    }

    async fn publish_pdf(&self, upload: StagedUpload) -> Result<DocumentStatus> {
        let dir = self.store.document_dir(upload.id);
        let moved = async {
            tokio::fs::create_dir_all(&dir).await?;
            move_file(&upload.path, &dir.join(store::PDF_FILE)).await
        }
        .await;
        if let Err(e) = moved {
            remove_quietly(&upload.path).await;
            return Err(Error::Internal {
                operation: format!("store PDF upload: {e}"),
            });
        }

        let status = DocumentStatus::completed(
            upload.id,
            DocumentFiles {
                pdf: store::file_url(upload.id, store::PDF_FILE),
                html: None,
            },
        )
        .with_original_filename(Some(upload.filename));
        self.store.write_status(&status).await?;

        info!(document_id = %upload.id, "PDF published without conversion");
        Ok(status)
    }

    /// Run the conversion and record the outcome.
    ///
    /// On shutdown the job is abandoned: LibreOffice is killed and the document marked failed.
    async fn process(&self, upload: StagedUpload, ticket: QueuedConversion) {
        let status = tokio::select! {
            status = self.run(&upload, ticket) => status,
            _ = self.shutdown.cancelled() => {
                warn!("Conversion abandoned for shutdown");
                DocumentStatus::failed(upload.id, SHUTDOWN_ERROR)
            }
        }
        .with_original_filename(Some(upload.filename.clone()));

        if let Err(e) = self.store.write_status(&status).await {
            error!(error = %e, "Failed to record conversion outcome");
        }
        remove_quietly(&upload.path).await;
    }

    async fn run(&self, upload: &StagedUpload, ticket: QueuedConversion) -> DocumentStatus {
        match ticket.start().await {
            Ok(_permit) => match self.convert(upload).await {
                Ok(files) => DocumentStatus::completed(upload.id, files),
                Err(e) => {
                    warn!(error = %e, "Document conversion failed");
                    DocumentStatus::failed(upload.id, e.to_string())
                }
            },
            Err(e) => DocumentStatus::failed(upload.id, e.to_string()),
        }
    }

    async fn convert(&self, upload: &StagedUpload) -> std::result::Result<DocumentFiles, ConversionError> {
        let dir = self.store.document_dir(upload.id);

        let pdf = self.converter.convert(&upload.path, &dir, OutputFormat::Pdf).await?;
        move_file(&pdf, &dir.join(store::PDF_FILE)).await?;
        info!("PDF rendition ready");

        let html = if self.generate_html {
            match self.render_html(upload, &dir).await {
                Ok(()) => Some(store::file_url(upload.id, store::HTML_FILE)),
                Err(e) => {
                    // The PDF is still usable on its own
                    warn!(error = %e, "HTML rendition failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(DocumentFiles {
            pdf: store::file_url(upload.id, store::PDF_FILE),
            html,
        })
    }

    async fn render_html(&self, upload: &StagedUpload, dir: &Path) -> std::result::Result<(), ConversionError> {
        let produced = self.converter.convert(&upload.path, dir, OutputFormat::Html).await?;
        let raw = tokio::fs::read(&produced).await?;
        if raw.is_empty() {
            return Err(ConversionError::MissingOutput);
        }

        let cleaned = html::clean_html(&String::from_utf8_lossy(&raw), &self.embedder_origin);
        tokio::fs::write(dir.join(store::HTML_FILE), cleaned).await?;
        if produced != dir.join(store::HTML_FILE) {
            remove_quietly(&produced).await;
        }
        Ok(())
    }

    /// Abandon in-flight conversions and wait for their statuses to be written.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.jobs.close();
        self.jobs.wait().await;
        info!("Conversion jobs stopped");
    }

    /// Periodically remove documents older than `retention` until cancelled.
    pub async fn run_sweeper(self, retention: Duration, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Document sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.store.sweep(retention).await {
                        warn!(error = %e, "Document sweep failed");
                    }
                }
            }
        }
    }
}

/// Rename, falling back to copy and delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if from == to {
        return Ok(());
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove staged upload");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::soffice::test_support::*;
    use super::*;
    use crate::config::ConversionConfig;
    use uuid::Uuid;

    struct Harness {
        _dir: tempfile::TempDir,
        service: DocumentService,
        bin: PathBuf,
    }

    fn harness(soffice: fn(&Path) -> PathBuf, generate_html: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let config = Config {
            data_dir: dir.path().join("data"),
            conversion: ConversionConfig {
                soffice_path: Some(soffice(&bin)),
                timeout: Duration::from_secs(5),
                generate_html,
                ..Default::default()
            },
            ..Default::default()
        };
        let limiter = Arc::new(ConversionLimiter::new(&config.conversion));
        Harness {
            service: DocumentService::new(&config, limiter),
            bin,
            _dir: dir,
        }
    }

    async fn stage(service: &DocumentService, name: &str) -> StagedUpload {
        let filename = sanitize_filename(name);
        let (kind, ext) = DocumentKind::from_filename(&filename).unwrap();
        let id = Uuid::new_v4();
        service.store().init().await.unwrap();
        let path = service.store().upload_path(id, &ext);
        tokio::fs::write(&path, b"upload bytes").await.unwrap();
        StagedUpload { id, kind, filename, path }
    }

    async fn wait_for_outcome(service: &DocumentService, id: DocumentId) -> DocumentStatus {
        for _ in 0..100 {
            let status = service.store().read_status(id).await.unwrap();
            if status.status != DocumentState::Processing {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("conversion did not finish");
    }

    #[tokio::test]
    async fn test_presentation_is_converted_in_background() {
        let h = harness(fake_soffice, true);
        let upload = stage(&h.service, "Week 1 Slides.pptx").await;
        let (id, staged_path) = (upload.id, upload.path.clone());

        let status = h.service.submit(upload).await.unwrap();
        assert_eq!(status.status, DocumentState::Processing);
        assert_eq!(status.original_filename.as_deref(), Some("Week_1_Slides.pptx"));

        let status = wait_for_outcome(&h.service, id).await;
        assert_eq!(status.status, DocumentState::Completed, "{status:?}");
        let files = status.files.unwrap();
        assert_eq!(files.pdf, format!("/api/presentations/files/{id}/presentation.pdf"));
        assert_eq!(files.html, Some(format!("/api/presentations/files/{id}/presentation.html")));

        let dir = h.service.store().document_dir(id);
        assert!(dir.join("presentation.pdf").exists());
        let html = std::fs::read_to_string(dir.join("presentation.html")).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("textSelection"));
        assert!(!staged_path.exists());
    }

    #[tokio::test]
    async fn test_failed_conversion_is_reported() {
        let h = harness(failing_soffice, false);
        let upload = stage(&h.service, "notes.docx").await;
        let id = upload.id;

        h.service.submit(upload).await.unwrap();
        let status = wait_for_outcome(&h.service, id).await;
        assert_eq!(status.status, DocumentState::Failed);
        assert_eq!(
            status.error.as_deref(),
            Some("Conversion failed: Error: source file could not be loaded")
        );
    }

    #[tokio::test]
    async fn test_pdf_is_published_immediately() {
        let h = harness(failing_soffice, false);
        let upload = stage(&h.service, "reading.pdf").await;
        let id = upload.id;

        let status = h.service.submit(upload).await.unwrap();
        assert_eq!(status.status, DocumentState::Completed);
        assert!(h.service.store().document_dir(id).join("presentation.pdf").exists());
        assert_eq!(h.service.store().read_status(id).await.unwrap().status, DocumentState::Completed);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_running_conversion() {
        let h = harness(hanging_soffice, false);
        let upload = stage(&h.service, "lecture.ppt").await;
        let (id, staged_path) = (upload.id, upload.path.clone());

        h.service.submit(upload).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(5), h.service.shutdown())
            .await
            .expect("shutdown waits for the job, not for LibreOffice");

        let status = h.service.store().read_status(id).await.unwrap();
        assert_eq!(status.status, DocumentState::Failed);
        assert_eq!(status.error.as_deref(), Some("Server shutting down"));
        assert_eq!(status.original_filename.as_deref(), Some("lecture.ppt"));
        assert!(!staged_path.exists());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let h = harness(fake_soffice, false);
        let token = CancellationToken::new();
        let handle = tokio::spawn(
            h.service
                .clone()
                .run_sweeper(Duration::from_secs(3600), Duration::from_millis(10), token.clone()),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        handle.await.unwrap();
        assert!(h.bin.exists());
    }
}

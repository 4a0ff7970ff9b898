//! On-disk layout of converted documents.
//!
//! ```text
//! {data_dir}/temp/{id}.{ext}                 upload awaiting conversion
//! {data_dir}/documents/{id}/status.json      current DocumentStatus
//! {data_dir}/documents/{id}/presentation.pdf
//! {data_dir}/documents/{id}/presentation.html
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::errors::{Error, Result};
use crate::types::DocumentId;

pub const STATUS_FILE: &str = "status.json";
pub const PDF_FILE: &str = "presentation.pdf";
pub const HTML_FILE: &str = "presentation.html";

/// Public URL of a converted file
pub fn file_url(id: DocumentId, filename: &str) -> String {
    format!("/api/presentations/files/{id}/{filename}")
}

/// Public URL of a document's status
pub fn status_url(id: DocumentId) -> String {
    format!("/api/presentations/status/{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Processing,
    Completed,
    Failed,
    NotFound,
}

/// Links to the renditions of a completed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DocumentFiles {
    pub pdf: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Progress of one upload, as persisted in `status.json` and returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DocumentStatus {
    #[schema(value_type = String, format = "uuid")]
    pub document_id: DocumentId,
    pub status: DocumentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<DocumentFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DocumentStatus {
    fn new(document_id: DocumentId, status: DocumentState) -> Self {
        Self {
            document_id,
            status,
            files: None,
            error: None,
            original_filename: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn processing(document_id: DocumentId, original_filename: &str) -> Self {
        Self {
            original_filename: Some(original_filename.to_string()),
            ..Self::new(document_id, DocumentState::Processing)
        }
    }

    pub fn completed(document_id: DocumentId, files: DocumentFiles) -> Self {
        Self {
            files: Some(files),
            ..Self::new(document_id, DocumentState::Completed)
        }
    }

    pub fn failed(document_id: DocumentId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(document_id, DocumentState::Failed)
        }
    }

    pub fn not_found(document_id: DocumentId) -> Self {
        Self {
            updated_at: None,
            ..Self::new(document_id, DocumentState::NotFound)
        }
    }

    /// Carry the upload name over from a previous status
    pub fn with_original_filename(mut self, name: Option<String>) -> Self {
        self.original_filename = name;
        self
    }
}

/// Filesystem access for documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    documents_dir: PathBuf,
    temp_dir: PathBuf,
}

impl DocumentStore {
    pub fn new(documents_dir: PathBuf, temp_dir: PathBuf) -> Self {
        Self {
            documents_dir,
            temp_dir,
        }
    }

    /// Create the base directories.
    pub async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.documents_dir).await?;
        tokio::fs::create_dir_all(&self.temp_dir).await
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn document_dir(&self, id: DocumentId) -> PathBuf {
        self.documents_dir.join(id.to_string())
    }

    /// Where an upload is staged before conversion
    pub fn upload_path(&self, id: DocumentId, extension: &str) -> PathBuf {
        self.temp_dir.join(format!("{id}.{extension}"))
    }

    /// Resolve a file inside a document directory, refusing anything that could escape it.
    pub fn file_path(&self, id: DocumentId, filename: &str) -> Result<PathBuf> {
        let traversal = filename.is_empty()
            || filename.starts_with('.')
            || filename.contains(['/', '\\'])
            || filename.contains("..");
        if traversal || filename == STATUS_FILE {
            return Err(Error::BadRequest {
                message: "Invalid file name".to_string(),
            });
        }
        Ok(self.document_dir(id).join(filename))
    }

    /// Persist a status atomically so pollers never read a partial file.
    pub async fn write_status(&self, status: &DocumentStatus) -> Result<()> {
        let dir = self.document_dir(status.document_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::Internal {
            operation: format!("create document directory: {e}"),
        })?;

        let body = serde_json::to_vec_pretty(status).map_err(|e| Error::Internal {
            operation: format!("serialize document status: {e}"),
        })?;

        let tmp = dir.join(format!(".{STATUS_FILE}.tmp"));
        tokio::fs::write(&tmp, body).await.map_err(|e| Error::Internal {
            operation: format!("write document status: {e}"),
        })?;
        tokio::fs::rename(&tmp, dir.join(STATUS_FILE))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("replace document status: {e}"),
            })?;

        debug!(document_id = %status.document_id, status = ?status.status, "Document status written");
        Ok(())
    }

    /// Read a status. Unknown documents yield `not_found`.
    pub async fn read_status(&self, id: DocumentId) -> Result<DocumentStatus> {
        let path = self.document_dir(id).join(STATUS_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::Internal {
                operation: format!("parse status for document {id}: {e}"),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DocumentStatus::not_found(id)),
            Err(e) => Err(Error::Internal {
                operation: format!("read status for document {id}: {e}"),
            }),
        }
    }

    /// Delete document directories and staged uploads last modified more than `retention` ago.
    pub async fn sweep(&self, retention: Duration) -> std::io::Result<usize> {
        let cutoff = SystemTime::now().checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for dir in [&self.documents_dir, &self.temp_dir] {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.modified()? > cutoff {
                    continue;
                }
                let path = entry.path();
                let result = if metadata.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                match result {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale document"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Removed stale documents");
        }
        Ok(removed)
    }
}

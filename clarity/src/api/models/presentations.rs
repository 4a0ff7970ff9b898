use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::conversion::{DocumentFiles, DocumentState, DocumentStatus, store};
use crate::types::DocumentId;

/// Returned by the upload endpoint.
///
/// Presentations and Word documents come back `processing` with a URL to poll. PDFs need no
/// conversion and come back `completed` with their file links.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    #[schema(value_type = String, format = "uuid")]
    pub document_id: DocumentId,
    pub status: DocumentState,
    pub check_status_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<DocumentFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
}

impl From<DocumentStatus> for UploadResponse {
    fn from(status: DocumentStatus) -> Self {
        Self {
            check_status_url: store::status_url(status.document_id),
            document_id: status.document_id,
            status: status.status,
            files: status.files,
            original_filename: status.original_filename,
        }
    }
}

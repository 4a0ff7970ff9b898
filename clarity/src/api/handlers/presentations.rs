use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::Field},
    http::{StatusCode, header},
    response::Response,
};
use std::path::Path as FsPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::presentations::UploadResponse,
    auth::current_user::CurrentUser,
    conversion::{self, DocumentKind, DocumentStatus, StagedUpload, sanitize_filename},
    errors::{Error, Result},
    types::DocumentId,
};

#[utoipa::path(
    post,
    path = "/api/presentations/upload",
    tag = "presentations",
    summary = "Upload a lecture document",
    description = "Upload a PowerPoint, Word or PDF file in the `file` field. Presentations and Word documents are \
                   converted in the background; poll `check_status_url` until the status is `completed` or `failed`.",
    request_body(content_type = "multipart/form-data", description = "Document in the `file` field"),
    responses(
        (status = 200, description = "Upload accepted", body = UploadResponse),
        (status = 400, description = "Missing file or unsupported file type"),
        (status = 401, description = "Missing or invalid access token"),
        (status = 413, description = "File exceeds the size limit"),
        (status = 429, description = "Conversion queue is full")
    ),
    security(("BearerAuth" = []))
)]
pub async fn upload_presentation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let document_id = Uuid::new_v4();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            debug!(field = ?field.name(), "Ignoring multipart field");
            continue;
        }

        let raw_name = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::BadRequest {
                message: "No filename provided".to_string(),
            })?;
        let filename = sanitize_filename(&raw_name);
        let (kind, extension) = DocumentKind::from_filename(&filename)?;

        info!(
            document_id = %document_id,
            user = %current_user.id,
            filename = %filename,
            kind = kind.label(),
            content_type = ?field.content_type(),
            "Receiving lecture upload"
        );

        let store = state.documents.store();
        store.init().await.map_err(|e| Error::Internal {
            operation: format!("create data directories: {e}"),
        })?;
        let path = store.upload_path(document_id, &extension);

        let size = match stream_to_file(field, &path, state.config.limits.files.max_file_size).await {
            Ok(size) => size,
            Err(e) => {
                conversion::remove_quietly(&path).await;
                return Err(e);
            }
        };
        debug!(document_id = %document_id, size, "Upload stored");

        let status = state
            .documents
            .submit(StagedUpload {
                id: document_id,
                kind,
                filename,
                path,
            })
            .await?;
        return Ok(Json(status.into()));
    }

    Err(Error::BadRequest {
        message: "No file provided".to_string(),
    })
}

/// Write an upload to disk, enforcing the size limit as chunks arrive.
async fn stream_to_file(mut field: Field<'_>, path: &FsPath, max_file_size: u64) -> Result<u64> {
    let io_error = |e: std::io::Error| Error::Internal {
        operation: format!("store upload: {e}"),
    };

    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut total = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        total += chunk.len() as u64;
        if max_file_size > 0 && total > max_file_size {
            warn!(total, max_file_size, "File size limit exceeded, aborting upload");
            return Err(Error::PayloadTooLarge {
                message: format!(
                    "File size exceeds maximum allowed size of {} bytes ({} MB)",
                    max_file_size,
                    max_file_size / (1024 * 1024)
                ),
            });
        }
        file.write_all(&chunk).await.map_err(io_error)?;
    }
    file.flush().await.map_err(io_error)?;

    if total == 0 {
        return Err(Error::BadRequest {
            message: "Uploaded file is empty".to_string(),
        });
    }
    Ok(total)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { message: e.body_text() }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/presentations/status/{document_id}",
    tag = "presentations",
    summary = "Conversion status",
    params(("document_id" = Uuid, Path, description = "Document ID returned by the upload")),
    responses(
        (status = 200, description = "Current status; unknown documents report `not_found`", body = DocumentStatus)
    )
)]
pub async fn get_status(State(state): State<AppState>, Path(document_id): Path<DocumentId>) -> Result<Json<DocumentStatus>> {
    Ok(Json(state.documents.store().read_status(document_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/presentations/files/{document_id}/{filename}",
    tag = "presentations",
    summary = "Download a converted file",
    params(
        ("document_id" = Uuid, Path, description = "Document ID"),
        ("filename" = String, Path, description = "File name, e.g. `presentation.pdf`")
    ),
    responses(
        (status = 200, description = "File contents"),
        (status = 400, description = "Invalid file name"),
        (status = 404, description = "File not found")
    )
)]
pub async fn get_file(
    State(state): State<AppState>,
    Path((document_id, filename)): Path<(DocumentId, String)>,
) -> Result<Response> {
    let path = state.documents.store().file_path(document_id, &filename)?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound {
                resource: "File".to_string(),
                id: format!("{document_id}/{filename}"),
            });
        }
        Err(e) => {
            return Err(Error::Internal {
                operation: format!("read {filename} for document {document_id}: {e}"),
            });
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&filename))
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| Error::Internal {
            operation: format!("build file response: {e}"),
        })
}

fn content_type(filename: &str) -> &'static str {
    let extension = FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/pdf",
    }
}

//! Document management routes

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, warn};

use super::{read_file_field, HealthState, JsonBody, QueryParams};
use crate::error::{HealthError, HealthResult};
use crate::models::{
    Document, DocumentListQuery, DocumentListResponse, DownloadLink, PreviewLink,
    UpdateDocumentRequest, UploadBatchResponse, UploadMetadata,
};
use crate::security::content_sha256;
use crate::services::intake::is_lab_pdf;
use crate::AuthenticatedUserId;

/// Create document routes with HealthState
pub fn routes(state: HealthState) -> Router {
    let upload_timeout = Duration::from_secs(state.config.upload_timeout_secs);
    let body_limit = state.config.max_request_bytes;

    Router::new()
        .route(
            "/documents/upload",
            post(upload_documents)
                .layer::<_, Infallible>(DefaultBodyLimit::max(body_limit))
                .layer::<_, Infallible>(TimeoutLayer::new(upload_timeout)),
        )
        .route(
            "/documents",
            get(list_documents).put(update_document).delete(delete_document),
        )
        .route("/documents/{id}/download", get(download_document))
        .route("/documents/{id}/preview", get(preview_document))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DocumentIdQuery {
    id: Option<String>,
}

impl DocumentIdQuery {
    fn require(self) -> HealthResult<String> {
        self.id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| HealthError::Validation("Document id is required".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct DocumentResponse {
    document: Document,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

/// Upload one or more documents
/// POST /documents/upload
async fn upload_documents(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    mut multipart: Multipart,
) -> Result<Json<UploadBatchResponse>, HealthError> {
    let limit = state.config.max_file_size;
    let mut files = Vec::new();
    let mut metadata = UploadMetadata::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| HealthError::Validation(format!("Failed to read form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "files[]" | "file" => files.push(read_file_field(&mut field, limit).await?),
            "metadata" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| HealthError::Validation(format!("Failed to read metadata: {}", e)))?;
                if !text.trim().is_empty() {
                    metadata = serde_json::from_str(&text).map_err(|e| {
                        HealthError::Validation(format!("Invalid metadata JSON: {}", e))
                    })?;
                }
            }
            other => debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    if files.is_empty() {
        return Err(HealthError::Validation("No files provided".to_string()));
    }

    // Detached so a request timeout cannot interrupt the rollback of a
    // half-stored batch
    let response = tokio::spawn(async move {
        let response = state
            .documents
            .ingest_batch(user.as_str(), files, &metadata, limit)
            .await;
        for document in response.uploaded.iter().filter(|d| is_lab_pdf(d)) {
            submit_lab_document(&state, document).await;
        }
        response
    })
    .await
    .map_err(|e| HealthError::Internal(format!("Upload task failed: {}", e)))?;

    Ok(Json(response))
}

/// Queue a lab PDF for analysis when enabled; never fails the upload
async fn submit_lab_document(state: &HealthState, document: &Document) {
    if !state.config.analyze_lab_documents {
        debug!(
            document_id = %document.id,
            "Lab PDF stored; automatic analysis is disabled"
        );
        return;
    }

    let data = match state.storage.get(&document.file_path).await {
        Ok(data) => data,
        Err(e) => {
            warn!(document_id = %document.id, error = %e, "Could not read lab PDF for analysis");
            return;
        }
    };
    if let Err(e) = state
        .intake
        .submit_document(document, content_sha256(&data))
        .await
    {
        warn!(document_id = %document.id, error = %e, "Failed to queue lab PDF for analysis");
    }
}

/// List the user's documents
/// GET /documents
async fn list_documents(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    QueryParams(query): QueryParams<DocumentListQuery>,
) -> Result<Json<DocumentListResponse>, HealthError> {
    let documents = state.documents.list(user.as_str(), &query).await?;
    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

/// Update document metadata
/// PUT /documents?id=
async fn update_document(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    QueryParams(query): QueryParams<DocumentIdQuery>,
    JsonBody(req): JsonBody<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>, HealthError> {
    let id = query.require()?;
    let document = state.documents.update(user.as_str(), &id, req).await?;
    Ok(Json(DocumentResponse { document }))
}

/// Delete a document and its stored file
/// DELETE /documents?id=
async fn delete_document(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    QueryParams(query): QueryParams<DocumentIdQuery>,
) -> Result<Json<SuccessResponse>, HealthError> {
    let id = query.require()?;
    state.documents.delete(user.as_str(), &id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// GET /documents/{id}/download
async fn download_document(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    Path(id): Path<String>,
) -> Result<Json<DownloadLink>, HealthError> {
    let link = state
        .documents
        .download_link(user.as_str(), &id, state.config.signed_url_ttl_secs)
        .await?;
    Ok(Json(link))
}

/// GET /documents/{id}/preview
async fn preview_document(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    Path(id): Path<String>,
) -> Result<Json<PreviewLink>, HealthError> {
    let link = state
        .documents
        .preview_link(user.as_str(), &id, state.config.signed_url_ttl_secs)
        .await?;
    Ok(Json(link))
}

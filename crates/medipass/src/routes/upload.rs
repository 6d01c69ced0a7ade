//! Lab file upload route - stores the file and queues AI analysis

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use super::{read_file_field, HealthState};
use crate::error::HealthError;
use crate::AuthenticatedUserId;

pub fn routes(state: HealthState) -> Router {
    let upload_timeout = Duration::from_secs(state.config.upload_timeout_secs);
    let body_limit = state.config.max_request_bytes;

    Router::new()
        .route(
            "/upload",
            post(upload_lab_file)
                .layer::<_, Infallible>(DefaultBodyLimit::max(body_limit))
                .layer::<_, Infallible>(TimeoutLayer::new(upload_timeout)),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LabUploadResponse {
    message: String,
    file_name: String,
    /// Storage key; the name is kept for existing clients
    supabase_file_path: String,
    lab_report_id: String,
}

/// POST /upload
///
/// Accepts a single `file` field. The lab report starts in `uploading` and is
/// picked up by the analysis worker.
async fn upload_lab_file(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    mut multipart: Multipart,
) -> Result<Json<LabUploadResponse>, HealthError> {
    let mut file = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| HealthError::Validation(format!("Failed to read form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if matches!(name.as_str(), "file" | "files" | "files[]") && file.is_none() {
            file = Some(read_file_field(&mut field, state.config.max_file_size).await?);
        }
    }
    let file = file.ok_or_else(|| HealthError::Validation("No file provided".to_string()))?;

    // Detached so a request timeout cannot interrupt the rollback of a
    // half-finished intake
    let intake = state.intake.clone();
    let max_file_size = state.config.max_file_size;
    let report = tokio::spawn(async move {
        intake
            .submit_upload(user.as_str(), file, max_file_size)
            .await
    })
    .await
    .map_err(|e| HealthError::Internal(format!("Upload task failed: {}", e)))??;

    Ok(Json(LabUploadResponse {
        message: "File uploaded successfully. Analysis has started.".to_string(),
        file_name: report.file_name,
        supabase_file_path: report.file_path,
        lab_report_id: report.id,
    }))
}

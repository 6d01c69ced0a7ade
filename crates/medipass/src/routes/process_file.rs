//! Synchronous analysis trigger

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{HealthState, JsonBody};
use crate::error::HealthError;
use crate::AuthenticatedUserId;

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/processFile", post(process_file))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessFileRequest {
    lab_report_id: String,
    file_path: String,
    file_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProcessFileResponse {
    success: bool,
    summary: Option<String>,
    transcription: Option<String>,
}

/// Run analysis for an `uploading` lab report and wait for the result
/// POST /processFile
async fn process_file(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    JsonBody(req): JsonBody<ProcessFileRequest>,
) -> Result<Json<ProcessFileResponse>, HealthError> {
    let report = state.lab_reports.get(user.as_str(), &req.lab_report_id).await?;
    if report.file_path != req.file_path {
        return Err(HealthError::Validation(
            "filePath does not match the lab report".to_string(),
        ));
    }

    info!(
        lab_report_id = %report.id,
        file_name = req.file_name.as_deref().unwrap_or(&report.file_name),
        "Processing lab file on request"
    );
    let report = state.pipeline.run(&report.id).await?;
    Ok(Json(ProcessFileResponse {
        success: true,
        summary: report.summary,
        transcription: report.transcription,
    }))
}

#[cfg(test)]
mod tests {
    use crate::models::LabReportStatus;
    use crate::testing::{ScriptedAnalyzer, TestApp};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;

    fn request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/processFile")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_file_returns_analysis() {
        let app = TestApp::with_analyzer(ScriptedAnalyzer::replying(
            r#"{"summary":"Vitamin D low","transcription":"25-OH D 18 ng/mL"}"#,
        ))
        .await;
        let report = app
            .state
            .lab_reports
            .create("u1", "vitd.pdf", "u1/1_vitd.pdf", "application/pdf")
            .await
            .unwrap();

        let response = app
            .send(
                "u1",
                request(json!({
                    "labReportId": report.id,
                    "filePath": "u1/1_vitd.pdf",
                    "fileName": "vitd.pdf"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = TestApp::json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["summary"], "Vitamin D low");
    }

    #[tokio::test]
    async fn test_process_file_failure_is_500() {
        let app = TestApp::with_analyzer(ScriptedAnalyzer::failing("upstream down")).await;
        let report = app
            .state
            .lab_reports
            .create("u1", "vitd.pdf", "u1/1_vitd.pdf", "application/pdf")
            .await
            .unwrap();

        let response = app
            .send(
                "u1",
                request(json!({ "labReportId": report.id, "filePath": "u1/1_vitd.pdf" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            app.state.lab_reports.get("u1", &report.id).await.unwrap().status,
            LabReportStatus::Error
        );
    }

    #[tokio::test]
    async fn test_process_file_checks_owner_and_path() {
        let app = TestApp::new().await;
        let report = app
            .state
            .lab_reports
            .create("u1", "vitd.pdf", "u1/1_vitd.pdf", "application/pdf")
            .await
            .unwrap();

        let response = app
            .send(
                "u2",
                request(json!({ "labReportId": report.id, "filePath": "u1/1_vitd.pdf" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .send(
                "u1",
                request(json!({ "labReportId": report.id, "filePath": "u1/other.pdf" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

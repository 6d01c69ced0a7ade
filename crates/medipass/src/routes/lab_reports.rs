//! Lab report routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use super::HealthState;
use crate::error::HealthError;
use crate::models::LabReport;
use crate::AuthenticatedUserId;

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/lab-reports", get(list_lab_reports))
        .route("/lab-reports/{id}", get(get_lab_report))
        .with_state(state)
}

async fn list_lab_reports(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
) -> Result<Json<Vec<LabReport>>, HealthError> {
    Ok(Json(state.lab_reports.list(user.as_str()).await?))
}

async fn get_lab_report(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    Path(id): Path<String>,
) -> Result<Json<LabReport>, HealthError> {
    Ok(Json(state.lab_reports.get(user.as_str(), &id).await?))
}

#[cfg(test)]
mod tests {
    use crate::testing::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn test_get_lab_report_scoped_to_owner() {
        let app = TestApp::new().await;
        let report = app
            .state
            .lab_reports
            .create("u1", "a1c.pdf", "u1/1_a1c.pdf", "application/pdf")
            .await
            .unwrap();

        let uri = format!("/api/lab-reports/{}", report.id);
        let response = app
            .send("u1", Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(TestApp::json(response).await["status"], "uploading");

        let response = app
            .send("u2", Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .send(
                "u2",
                Request::builder()
                    .uri("/api/lab-reports")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(TestApp::json(response).await, serde_json::json!([]));
    }
}

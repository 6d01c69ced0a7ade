//! Medication routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::{HealthState, JsonBody, QueryParams};
use crate::error::HealthError;
use crate::models::{
    CreateMedicationRequest, Medication, MedicationListQuery, UpdateMedicationRequest,
};
use crate::AuthenticatedUserId;

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/medications", get(list_medications).post(create_medication))
        .route(
            "/medications/{id}",
            get(get_medication)
                .put(update_medication)
                .delete(delete_medication),
        )
        .route("/medications/{id}/take-dose", post(take_dose))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct MedicationResponse {
    medication: Medication,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn list_medications(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    QueryParams(query): QueryParams<MedicationListQuery>,
) -> Result<Json<Vec<Medication>>, HealthError> {
    Ok(Json(state.medications.list(user.as_str(), &query).await?))
}

async fn create_medication(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    JsonBody(req): JsonBody<CreateMedicationRequest>,
) -> Result<Json<MedicationResponse>, HealthError> {
    let medication = state.medications.create(user.as_str(), req).await?;
    Ok(Json(MedicationResponse { medication }))
}

async fn get_medication(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    Path(id): Path<String>,
) -> Result<Json<MedicationResponse>, HealthError> {
    let medication = state.medications.get(user.as_str(), &id).await?;
    Ok(Json(MedicationResponse { medication }))
}

async fn update_medication(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateMedicationRequest>,
) -> Result<Json<MedicationResponse>, HealthError> {
    let medication = state.medications.update(user.as_str(), &id, req).await?;
    Ok(Json(MedicationResponse { medication }))
}

async fn delete_medication(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, HealthError> {
    state.medications.delete(user.as_str(), &id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Record a dose taken today (UTC)
/// POST /medications/{id}/take-dose
async fn take_dose(
    State(state): State<HealthState>,
    user: AuthenticatedUserId,
    Path(id): Path<String>,
) -> Result<Json<MedicationResponse>, HealthError> {
    let today = chrono::Utc::now().date_naive();
    let medication = state.medications.take_dose(user.as_str(), &id, today).await?;
    Ok(Json(MedicationResponse { medication }))
}

#[cfg(test)]
mod tests {
    use crate::testing::TestApp;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_take_dose_flow() {
        let app = TestApp::new().await;
        let response = app
            .send(
                "u1",
                post_json("/api/medications", r#"{"name":"Metformin","pills_remaining":1}"#),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let id = TestApp::json(response).await["medication"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let dose_uri = format!("/api/medications/{}/take-dose", id);
        let response = app.send("u1", post_json(&dose_uri, "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = TestApp::json(response).await;
        assert_eq!(json["medication"]["pills_remaining"], 0);
        assert_eq!(json["medication"]["status"], "completed");
        assert_eq!(
            json["medication"]["end_date"],
            chrono::Utc::now().date_naive().to_string()
        );

        let response = app.send("u1", post_json(&dose_uri, "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(TestApp::json(response).await["message"], "No pills remaining.");
    }

    #[tokio::test]
    async fn test_medications_require_user() {
        let app = TestApp::new().await;
        let response = app
            .anonymous(
                Request::builder()
                    .uri("/api/medications")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let app = TestApp::new().await;
        app.send(
            "u1",
            post_json("/api/medications", r#"{"name":"Lisinopril","pills_remaining":30}"#),
        )
        .await;
        app.send(
            "u1",
            post_json(
                "/api/medications",
                r#"{"name":"Ibuprofen","pills_remaining":0,"status":"paused"}"#,
            ),
        )
        .await;

        let response = app
            .send(
                "u1",
                Request::builder()
                    .uri("/api/medications?status=paused")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        let json = TestApp::json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "Ibuprofen");
    }

    #[tokio::test]
    async fn test_unknown_status_filter_is_json_error() {
        let app = TestApp::new().await;
        let response = app
            .send(
                "u1",
                Request::builder()
                    .uri("/api/medications?status=sideways")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(TestApp::json(response).await["code"], "VALIDATION_ERROR");
    }
}

//! Authentication API routes

use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Extension, Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::middleware::UserContext;
use super::service::{AuthService, CreateApiKeyRequest, RegisterRequest};
use super::session::{SessionService, SESSION_TTL_DAYS};
use super::SESSION_COOKIE_NAME;
use crate::state::AppState;

/// Auth routes that require an authenticated caller
pub fn protected_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(get_current_user))
        .route("/keys", get(list_api_keys).post(create_api_key))
        .route("/keys/{key_id}", delete(revoke_api_key))
}

fn error(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn session_cookie(state: &AppState, value: &str, max_age_secs: i64) -> String {
    let secure = if state.config.secure_cookies { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE_NAME, value, max_age_secs, secure
    )
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    match AuthService::new(state.pool.clone()).register(request).await {
        Ok(response) => {
            info!(user_id = %response.user.id, "User registered");
            (
                StatusCode::CREATED,
                Json(json!({
                    "user": response.user,
                    "api_key": response.api_key,
                    "message": "Save your API key securely. It will only be shown once."
                })),
            )
                .into_response()
        }
        Err(e) => error(StatusCode::BAD_REQUEST, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub api_key: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match SessionService::new(state.pool.clone())
        .create_session(&request.api_key)
        .await
    {
        Ok((session, user)) => {
            let cookie = session_cookie(&state, &session.id, SESSION_TTL_DAYS * 24 * 60 * 60);
            (
                StatusCode::OK,
                [(SET_COOKIE, cookie)],
                Json(json!({ "user": {
                    "id": user.id,
                    "email": user.email,
                    "display_name": user.display_name
                }})),
            )
                .into_response()
        }
        Err(e) => error(StatusCode::UNAUTHORIZED, e),
    }
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        if let Err(e) = SessionService::new(state.pool.clone())
            .delete_session(cookie.value())
            .await
        {
            warn!(error = %e, "Failed to delete session");
        }
    }

    (
        StatusCode::OK,
        [(SET_COOKIE, session_cookie(&state, "", 0))],
        Json(json!({ "message": "Logged out" })),
    )
        .into_response()
}

/// GET /api/auth/me
async fn get_current_user(Extension(ctx): Extension<UserContext>) -> Response {
    Json(json!({
        "id": ctx.user_id,
        "email": ctx.email,
        "display_name": ctx.display_name
    }))
    .into_response()
}

async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
) -> Response {
    match AuthService::new(state.pool.clone())
        .list_api_keys(&ctx.user_id)
        .await
    {
        Ok(keys) => Json(json!({ "keys": keys })).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Response {
    match AuthService::new(state.pool.clone())
        .create_api_key(&ctx.user_id, request)
        .await
    {
        Ok(response) => (
            StatusCode::CREATED,
            Json(json!({
                "key": response,
                "message": "Save your API key securely. It will only be shown once."
            })),
        )
            .into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(key_id): Path<String>,
) -> Response {
    match AuthService::new(state.pool.clone())
        .revoke_api_key(&ctx.user_id, &key_id)
        .await
    {
        Ok(()) => Json(json!({ "message": "API key revoked" })).into_response(),
        Err(e) => error(StatusCode::NOT_FOUND, e),
    }
}

//! Authentication middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use medipass::{AuthenticatedUserId, HealthError};
use std::sync::Arc;
use tracing::debug;

use super::service::{AuthService, User};
use super::session::SessionService;
use super::SESSION_COOKIE_NAME;
use crate::state::AppState;

/// User context extracted from authentication
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

impl From<User> for UserContext {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            display_name: user.display_name,
        }
    }
}

/// API key from `X-API-Key` or `Authorization: Bearer`
fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("X-API-Key") {
        return value.to_str().ok().map(|s| s.trim().to_string());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

/// Resolve the caller from a session cookie, falling back to an API key
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());

    let mut user = None;
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        match SessionService::new(state.pool.clone())
            .validate_session(cookie.value())
            .await
        {
            Ok(u) => user = Some(u),
            Err(e) => debug!(error = %e, "Session cookie rejected"),
        }
    }

    if user.is_none() {
        if let Some(api_key) = api_key_from_headers(request.headers()) {
            match AuthService::new(state.pool.clone())
                .verify_api_key(&api_key)
                .await
            {
                Ok(u) => user = Some(u),
                Err(e) => debug!(error = %e, "API key rejected"),
            }
        }
    }

    match user {
        Some(user) => {
            request
                .extensions_mut()
                .insert(AuthenticatedUserId(user.id.clone()));
            request.extensions_mut().insert(UserContext::from(user));
            next.run(request).await
        }
        None => HealthError::Unauthorized.into_response(),
    }
}

//! Signed storage links - serves stored objects without a session

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;

use super::{HealthState, QueryParams};
use crate::error::HealthError;

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/storage/{*path}", get(serve_object))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SignatureQuery {
    expires: i64,
    signature: String,
}

/// GET /storage/{*path}?expires=&signature=
async fn serve_object(
    State(state): State<HealthState>,
    Path(path): Path<String>,
    QueryParams(query): QueryParams<SignatureQuery>,
) -> Result<impl IntoResponse, HealthError> {
    state
        .storage
        .verify_signed_url(&path, query.expires, &query.signature)?;

    let data = state.storage.get(&path).await?;
    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=300".to_string()),
        ],
        data,
    ))
}

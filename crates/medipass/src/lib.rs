//! MediPass personal health record core
//!
//! This crate provides the health record backend: document storage, the lab
//! report analysis pipeline, medication tracking and the assistant chat.
//!
//! # Features
//! - Multi-file document upload with per-file validation
//! - Signed, expiring links for stored files
//! - Queued AI analysis of lab reports with idempotent jobs
//! - Atomic medication dose recording
//! - Streaming chat with an offline fallback
//!
//! Authentication is not handled here. The embedding server inserts an
//! [`AuthenticatedUserId`] into each request's extensions.

pub mod config;
pub mod error;
pub mod migrations;
pub mod models;
pub mod routes;
pub mod security;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PipelineConfig;
pub use error::{HealthError, HealthResult};
pub use routes::{api_routes, storage_routes, HealthState};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Authenticated user ID from auth middleware
#[derive(Clone, Debug)]
pub struct AuthenticatedUserId(pub String);

impl AuthenticatedUserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUserId
where
    S: Send + Sync,
{
    type Rejection = HealthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUserId>()
            .cloned()
            .ok_or(HealthError::Unauthorized)
    }
}

//! Error types for the health record core

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for health record operations
pub type HealthResult<T> = Result<T, HealthError>;

/// Health record error types
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Lab report not found: {0}")]
    LabReportNotFound(String),

    #[error("Medication not found: {0}")]
    MedicationNotFound(String),

    #[error("File type not allowed for '{file_name}': {mime_type}")]
    UnsupportedFileType { file_name: String, mime_type: String },

    #[error("File '{file_name}' is too large ({size} bytes). Maximum size is {limit_mb} MB")]
    FileTooLarge {
        file_name: String,
        size: u64,
        limit_mb: u64,
    },

    #[error("No pills remaining.")]
    NoPillsRemaining,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid or expired signature")]
    InvalidSignature,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("AI provider error: {0}")]
    Ai(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for HealthError {
    fn from(err: sqlx::Error) -> Self {
        HealthError::Database(err.to_string())
    }
}

impl From<std::io::Error> for HealthError {
    fn from(err: std::io::Error) -> Self {
        HealthError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HealthError {
    fn from(err: serde_json::Error) -> Self {
        HealthError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for HealthError {
    fn from(err: reqwest::Error) -> Self {
        HealthError::Ai(err.to_string())
    }
}

impl From<JsonRejection> for HealthError {
    fn from(rejection: JsonRejection) -> Self {
        HealthError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for HealthError {
    fn from(rejection: QueryRejection) -> Self {
        HealthError::Validation(rejection.body_text())
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl HealthError {
    /// Convert to API error code
    pub fn code(&self) -> &'static str {
        match self {
            HealthError::Unauthorized => "UNAUTHORIZED",
            HealthError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            HealthError::LabReportNotFound(_) => "LAB_REPORT_NOT_FOUND",
            HealthError::MedicationNotFound(_) => "MEDICATION_NOT_FOUND",
            HealthError::UnsupportedFileType { .. } => "UNSUPPORTED_FILE_TYPE",
            HealthError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            HealthError::NoPillsRemaining => "NO_PILLS_REMAINING",
            HealthError::InvalidTransition { .. } => "INVALID_TRANSITION",
            HealthError::InvalidSignature => "INVALID_SIGNATURE",
            HealthError::Validation(_) => "VALIDATION_ERROR",
            HealthError::Storage(_) => "STORAGE_ERROR",
            HealthError::Queue(_) => "QUEUE_ERROR",
            HealthError::Ai(_) => "AI_ERROR",
            HealthError::Database(_) => "DATABASE_ERROR",
            HealthError::Io(_) => "IO_ERROR",
            HealthError::Serialization(_) => "SERIALIZATION_ERROR",
            HealthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthError::Unauthorized => StatusCode::UNAUTHORIZED,

            HealthError::DocumentNotFound(_)
            | HealthError::LabReportNotFound(_)
            | HealthError::MedicationNotFound(_) => StatusCode::NOT_FOUND,

            HealthError::UnsupportedFileType { .. }
            | HealthError::FileTooLarge { .. }
            | HealthError::NoPillsRemaining
            | HealthError::Validation(_) => StatusCode::BAD_REQUEST,

            HealthError::InvalidTransition { .. } => StatusCode::CONFLICT,

            HealthError::InvalidSignature => StatusCode::FORBIDDEN,

            HealthError::Storage(_)
            | HealthError::Queue(_)
            | HealthError::Ai(_)
            | HealthError::Database(_)
            | HealthError::Io(_)
            | HealthError::Serialization(_)
            | HealthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HealthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        }
        let body = ApiError {
            code: self.code().to_string(),
            message: self.to_string(),
            details: None,
        };

        (status, axum::Json(body)).into_response()
    }
}

//! Document model - metadata for user-owned uploaded files

use axum::body::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::HealthError;

/// Document category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCategory {
    Lab,
    Prescription,
    Imaging,
    Insurance,
    #[default]
    General,
    Report,
    Immunization,
    Photo,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::Lab => "lab",
            DocumentCategory::Prescription => "prescription",
            DocumentCategory::Imaging => "imaging",
            DocumentCategory::Insurance => "insurance",
            DocumentCategory::General => "general",
            DocumentCategory::Report => "report",
            DocumentCategory::Immunization => "immunization",
            DocumentCategory::Photo => "photo",
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentCategory {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lab" => Ok(DocumentCategory::Lab),
            "prescription" => Ok(DocumentCategory::Prescription),
            "imaging" => Ok(DocumentCategory::Imaging),
            "insurance" => Ok(DocumentCategory::Insurance),
            "general" => Ok(DocumentCategory::General),
            "report" => Ok(DocumentCategory::Report),
            "immunization" => Ok(DocumentCategory::Immunization),
            "photo" => Ok(DocumentCategory::Photo),
            other => Err(HealthError::Validation(format!(
                "Unknown document category: {}",
                other
            ))),
        }
    }
}

/// Document record
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub display_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub category: DocumentCategory,
    pub folder_path: String,
    pub tags: BTreeSet<String>,
    pub notes: Option<String>,
    pub provider: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Raw `documents` row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DocumentRow {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub display_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub category: String,
    pub folder_path: String,
    pub tags: String,
    pub notes: Option<String>,
    pub provider: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = HealthError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let category = row.category.parse().map_err(|_| {
            HealthError::Internal(format!(
                "Document {} has unknown category '{}'",
                row.id, row.category
            ))
        })?;
        Ok(Document {
            category,
            tags: serde_json::from_str(&row.tags)?,
            metadata: serde_json::from_str(&row.metadata)?,
            id: row.id,
            user_id: row.user_id,
            file_name: row.file_name,
            display_name: row.display_name,
            file_path: row.file_path,
            file_size: row.file_size,
            mime_type: row.mime_type,
            folder_path: row.folder_path,
            notes: row.notes,
            provider: row.provider,
            document_date: row.document_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Optional metadata sent alongside uploaded files
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadMetadata {
    pub display_name: Option<String>,
    pub category: Option<DocumentCategory>,
    pub folder_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub provider: Option<String>,
    pub document_date: Option<NaiveDate>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A file received from a client, before validation
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: String,
    /// Received bytes; truncated when `size` exceeded the upload limit
    pub data: Bytes,
    /// Total number of bytes the client sent for this file
    pub size: u64,
}

impl IncomingFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            size: data.len() as u64,
            data,
        }
    }
}

/// Partial update of a document; owner and storage fields are not editable
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDocumentRequest {
    pub display_name: Option<String>,
    pub category: Option<DocumentCategory>,
    pub folder_path: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
    pub provider: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Filters for listing documents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentListQuery {
    pub category: Option<DocumentCategory>,
    pub folder: Option<String>,
    pub search: Option<String>,
    /// Comma-separated; a document matches when it carries any of them
    pub tags: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl DocumentListQuery {
    /// Requested tags, lowercased; tag matching ignores case
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct UploadFailure {
    pub file_name: String,
    pub error: String,
}

/// Batch upload outcome; siblings of a failed file still succeed
#[derive(Debug, Serialize)]
pub struct UploadBatchResponse {
    pub success: bool,
    pub uploaded: Vec<Document>,
    pub errors: Vec<UploadFailure>,
    pub total_uploaded: usize,
    pub total_errors: usize,
}

impl UploadBatchResponse {
    pub fn new(uploaded: Vec<Document>, errors: Vec<UploadFailure>) -> Self {
        Self {
            success: !uploaded.is_empty(),
            total_uploaded: uploaded.len(),
            total_errors: errors.len(),
            uploaded,
            errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadLink {
    pub download_url: String,
    pub file_name: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct PreviewLink {
    pub preview_url: String,
    pub file_type: String,
    pub expires_in: u64,
}

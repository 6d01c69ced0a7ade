//! Analysis job events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HealthError;

/// Event emitted after a lab file is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadedEvent {
    pub file_path_in_bucket: String,
    pub original_file_name: String,
    pub content_type: String,
    pub user_id: String,
    pub lab_report_id: String,
    /// Hex SHA-256 of the stored bytes
    pub content_hash: String,
}

impl FileUploadedEvent {
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.lab_report_id, self.content_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisJobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl AnalysisJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisJobStatus::Queued => "queued",
            AnalysisJobStatus::Running => "running",
            AnalysisJobStatus::Done => "done",
            AnalysisJobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisJobStatus {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(AnalysisJobStatus::Queued),
            "running" => Ok(AnalysisJobStatus::Running),
            "done" => Ok(AnalysisJobStatus::Done),
            "failed" => Ok(AnalysisJobStatus::Failed),
            other => Err(HealthError::Internal(format!("Unknown job status: {}", other))),
        }
    }
}

/// Result of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A job with the same idempotency key already exists
    Duplicate,
}

//! Lab report model and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HealthError;

/// Lab report status
///
/// `uploading -> processing -> completed | error`; both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabReportStatus {
    Uploading,
    Processing,
    Completed,
    Error,
}

impl LabReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabReportStatus::Uploading => "uploading",
            LabReportStatus::Processing => "processing",
            LabReportStatus::Completed => "completed",
            LabReportStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LabReportStatus::Completed | LabReportStatus::Error)
    }

    pub fn can_transition_to(&self, next: LabReportStatus) -> bool {
        matches!(
            (self, next),
            (LabReportStatus::Uploading, LabReportStatus::Processing)
                | (LabReportStatus::Uploading, LabReportStatus::Error)
                | (LabReportStatus::Processing, LabReportStatus::Completed)
                | (LabReportStatus::Processing, LabReportStatus::Error)
        )
    }
}

impl fmt::Display for LabReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabReportStatus {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(LabReportStatus::Uploading),
            "processing" => Ok(LabReportStatus::Processing),
            "completed" => Ok(LabReportStatus::Completed),
            "error" => Ok(LabReportStatus::Error),
            other => Err(HealthError::Internal(format!(
                "Unknown lab report status: {}",
                other
            ))),
        }
    }
}

/// Lab report record
#[derive(Debug, Clone, Serialize)]
pub struct LabReport {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub status: LabReportStatus,
    pub summary: Option<String>,
    pub transcription: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LabReportRow {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub status: String,
    pub summary: Option<String>,
    pub transcription: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<LabReportRow> for LabReport {
    type Error = HealthError;

    fn try_from(row: LabReportRow) -> Result<Self, Self::Error> {
        Ok(LabReport {
            status: row.status.parse()?,
            id: row.id,
            user_id: row.user_id,
            file_name: row.file_name,
            file_path: row.file_path,
            content_type: row.content_type,
            summary: row.summary,
            transcription: row.transcription,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processing_started_at: row.processing_started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Parsed output of one analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub transcription: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use LabReportStatus::*;
        assert!(Uploading.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Error));
        assert!(Uploading.can_transition_to(Error));

        assert!(!Uploading.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn test_terminal() {
        assert!(LabReportStatus::Completed.is_terminal());
        assert!(LabReportStatus::Error.is_terminal());
        assert!(!LabReportStatus::Processing.is_terminal());
    }
}

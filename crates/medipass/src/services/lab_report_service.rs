//! Lab report service - persistence for the analysis state machine
//!
//! Transitions are conditional updates on the current status, so a report
//! can only move forward and only once.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{HealthError, HealthResult};
use crate::models::{AnalysisResult, LabReport, LabReportRow, LabReportStatus};

#[derive(Clone)]
pub struct LabReportService {
    pool: SqlitePool,
}

impl LabReportService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a freshly stored lab file in `uploading`
    pub async fn create(
        &self,
        user_id: &str,
        file_name: &str,
        file_path: &str,
        content_type: &str,
    ) -> HealthResult<LabReport> {
        let now = Utc::now();
        let report = LabReport {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            file_name: file_name.to_string(),
            file_path: file_path.to_string(),
            content_type: content_type.to_string(),
            status: LabReportStatus::Uploading,
            summary: None,
            transcription: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            processing_started_at: None,
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO lab_reports (id, user_id, file_name, file_path, content_type, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.id)
        .bind(&report.user_id)
        .bind(&report.file_name)
        .bind(&report.file_path)
        .bind(&report.content_type)
        .bind(report.status.as_str())
        .bind(report.created_at)
        .bind(report.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(report)
    }

    pub async fn get(&self, user_id: &str, report_id: &str) -> HealthResult<LabReport> {
        let row: Option<LabReportRow> =
            sqlx::query_as("SELECT * FROM lab_reports WHERE id = ? AND user_id = ?")
                .bind(report_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| HealthError::LabReportNotFound(report_id.to_string()))?
            .try_into()
    }

    pub async fn list(&self, user_id: &str) -> HealthResult<Vec<LabReport>> {
        let rows: Vec<LabReportRow> = sqlx::query_as(
            "SELECT * FROM lab_reports WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LabReport::try_from).collect()
    }

    /// Unscoped lookup for the background worker
    pub(crate) async fn get_by_id(&self, report_id: &str) -> HealthResult<LabReport> {
        let row: Option<LabReportRow> = sqlx::query_as("SELECT * FROM lab_reports WHERE id = ?")
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| HealthError::LabReportNotFound(report_id.to_string()))?
            .try_into()
    }

    /// `uploading -> processing`
    pub async fn begin_processing(&self, report_id: &str) -> HealthResult<LabReport> {
        let now = Utc::now();
        let row: Option<LabReportRow> = sqlx::query_as(
            "UPDATE lab_reports SET status = 'processing', processing_started_at = ?, updated_at = ?
             WHERE id = ? AND status = 'uploading'
             RETURNING *",
        )
        .bind(now)
        .bind(now)
        .bind(report_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.transition_error(report_id, LabReportStatus::Processing).await),
        }
    }

    /// `processing -> completed` with the analysis output
    pub async fn complete(&self, report_id: &str, result: &AnalysisResult) -> HealthResult<LabReport> {
        if result.summary.trim().is_empty() {
            return Err(HealthError::Validation("Analysis summary is empty".to_string()));
        }

        let now = Utc::now();
        let row: Option<LabReportRow> = sqlx::query_as(
            "UPDATE lab_reports SET status = 'completed', summary = ?, transcription = ?,
                error_message = NULL, completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'
             RETURNING *",
        )
        .bind(&result.summary)
        .bind(&result.transcription)
        .bind(now)
        .bind(now)
        .bind(report_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                info!(lab_report_id = report_id, "Lab report analysis completed");
                row.try_into()
            }
            None => Err(self.transition_error(report_id, LabReportStatus::Completed).await),
        }
    }

    /// `processing -> error`; summary and transcription are left as they were
    pub async fn fail(&self, report_id: &str, message: &str) -> HealthResult<LabReport> {
        let now = Utc::now();
        let row: Option<LabReportRow> = sqlx::query_as(
            "UPDATE lab_reports SET status = 'error', error_message = ?, completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'
             RETURNING *",
        )
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(report_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                warn!(lab_report_id = report_id, error = message, "Lab report analysis failed");
                row.try_into()
            }
            None => Err(self.transition_error(report_id, LabReportStatus::Error).await),
        }
    }

    /// Remove a report that never entered the pipeline
    pub async fn delete(&self, report_id: &str) -> HealthResult<()> {
        sqlx::query("DELETE FROM lab_reports WHERE id = ?")
            .bind(report_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fail every report that entered `processing` before `cutoff`
    pub async fn fail_stale(&self, cutoff: DateTime<Utc>) -> HealthResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE lab_reports SET status = 'error', error_message = ?, completed_at = ?, updated_at = ?
             WHERE status = 'processing' AND julianday(processing_started_at) < julianday(?)",
        )
        .bind("Analysis timed out")
        .bind(now)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fail reports left in `uploading` since before `cutoff` with no live
    /// analysis job behind them
    pub async fn fail_orphaned_uploads(&self, cutoff: DateTime<Utc>) -> HealthResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE lab_reports SET status = 'error', error_message = ?, completed_at = ?, updated_at = ?
             WHERE status = 'uploading' AND julianday(created_at) < julianday(?)
               AND NOT EXISTS (
                   SELECT 1 FROM analysis_jobs
                   WHERE analysis_jobs.lab_report_id = lab_reports.id
                     AND analysis_jobs.status IN ('queued', 'running')
               )",
        )
        .bind("Upload was never queued for analysis")
        .bind(now)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn transition_error(&self, report_id: &str, to: LabReportStatus) -> HealthError {
        match self.get_by_id(report_id).await {
            Ok(report) => HealthError::InvalidTransition {
                from: report.status.to_string(),
                to: to.to_string(),
            },
            Err(e) => e,
        }
    }
}

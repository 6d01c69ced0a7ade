//! Lab file intake - store, record and queue a file for analysis
//!
//! Each step undoes the previous ones when it fails, so a failed intake
//! leaves neither an orphaned object nor a report that will never progress.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::HealthResult;
use crate::models::{Document, DocumentCategory, EnqueueOutcome, FileUploadedEvent, IncomingFile, LabReport};
use crate::security::{content_sha256, next_storage_path, validate_upload};
use crate::services::jobs::AnalysisQueue;
use crate::services::lab_report_service::LabReportService;
use crate::services::storage::ObjectStorage;

#[derive(Clone)]
pub struct LabIntake {
    storage: Arc<dyn ObjectStorage>,
    lab_reports: LabReportService,
    queue: AnalysisQueue,
}

impl LabIntake {
    pub fn new(storage: Arc<dyn ObjectStorage>, lab_reports: LabReportService, queue: AnalysisQueue) -> Self {
        Self {
            storage,
            lab_reports,
            queue,
        }
    }

    /// Store a new lab file and queue it for analysis
    pub async fn submit_upload(
        &self,
        user_id: &str,
        file: IncomingFile,
        max_file_size: u64,
    ) -> HealthResult<LabReport> {
        let mime_type = validate_upload(&file, max_file_size)?;
        let file_path = next_storage_path(user_id, &file.file_name);
        let content_hash = content_sha256(&file.data);

        self.storage.put(&file_path, &file.data, &mime_type).await?;

        let result = self
            .record_and_queue(user_id, &file.file_name, &file_path, &mime_type, content_hash)
            .await;
        if result.is_err() {
            if let Err(e) = self.storage.delete(&file_path).await {
                warn!(storage_path = %file_path, error = %e, "Compensating delete failed");
            }
        }
        result
    }

    /// Queue an already stored document for analysis
    pub async fn submit_document(
        &self,
        document: &Document,
        content_hash: String,
    ) -> HealthResult<LabReport> {
        self.record_and_queue(
            &document.user_id,
            &document.file_name,
            &document.file_path,
            &document.mime_type,
            content_hash,
        )
        .await
    }

    async fn record_and_queue(
        &self,
        user_id: &str,
        file_name: &str,
        file_path: &str,
        content_type: &str,
        content_hash: String,
    ) -> HealthResult<LabReport> {
        let report = self
            .lab_reports
            .create(user_id, file_name, file_path, content_type)
            .await?;

        let event = FileUploadedEvent {
            file_path_in_bucket: file_path.to_string(),
            original_file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            user_id: user_id.to_string(),
            lab_report_id: report.id.clone(),
            content_hash,
        };

        match self.queue.enqueue(&event).await {
            Ok(EnqueueOutcome::Queued) => {
                info!(user_id, lab_report_id = %report.id, "Lab file submitted for analysis");
                Ok(report)
            }
            Ok(EnqueueOutcome::Duplicate) => {
                debug!(lab_report_id = %report.id, "Lab file already queued");
                Ok(report)
            }
            Err(e) => {
                warn!(lab_report_id = %report.id, error = %e, "Enqueue failed, removing lab report");
                if let Err(cleanup) = self.lab_reports.delete(&report.id).await {
                    warn!(lab_report_id = %report.id, error = %cleanup, "Compensating report delete failed");
                }
                Err(e)
            }
        }
    }
}

/// Whether a stored document looks like a lab PDF worth analyzing
pub fn is_lab_pdf(document: &Document) -> bool {
    document.mime_type == "application/pdf"
        && (document.category == DocumentCategory::Lab || document.has_tag("lab"))
}

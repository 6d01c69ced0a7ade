//! Routes module - HTTP API endpoints

pub mod chat;
pub mod documents;
pub mod lab_reports;
pub mod medications;
pub mod process_file;
pub mod storage;
pub mod upload;

use axum::extract::multipart::Field;
use axum::extract::{FromRequest, FromRequestParts};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::{HealthError, HealthResult};
use crate::models::IncomingFile;
use crate::services::{
    AnalysisPipeline, AnalysisProvider, AnalysisQueue, ChatService, DocumentService, LabIntake,
    LabReportService, MedicationService, ObjectStorage,
};

pub use crate::AuthenticatedUserId;

/// Shared state for all health record routes
#[derive(Clone)]
pub struct HealthState {
    pub config: Arc<PipelineConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub documents: Arc<DocumentService>,
    pub lab_reports: LabReportService,
    pub medications: MedicationService,
    pub intake: LabIntake,
    pub pipeline: AnalysisPipeline,
    pub chat: Arc<ChatService>,
}

impl HealthState {
    pub fn new(
        pool: SqlitePool,
        storage: Arc<dyn ObjectStorage>,
        config: PipelineConfig,
        queue: AnalysisQueue,
        analyzer: Arc<dyn AnalysisProvider>,
        chat: ChatService,
    ) -> Self {
        let lab_reports = LabReportService::new(pool.clone());
        let pipeline = AnalysisPipeline::new(
            lab_reports.clone(),
            storage.clone(),
            analyzer,
            config.signed_url_ttl_secs,
        );
        Self {
            documents: Arc::new(DocumentService::new(pool.clone(), storage.clone())),
            medications: MedicationService::new(pool),
            intake: LabIntake::new(storage.clone(), lab_reports.clone(), queue),
            config: Arc::new(config),
            storage,
            lab_reports,
            pipeline,
            chat: Arc::new(chat),
        }
    }
}

/// JSON body extractor whose rejections are validation errors
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(HealthError))]
pub(crate) struct JsonBody<T>(pub T);

/// Query string extractor whose rejections are validation errors
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(HealthError))]
pub(crate) struct QueryParams<T>(pub T);

/// Authenticated API routes, meant to be nested under `/api`
pub fn api_routes(state: HealthState) -> Router {
    Router::new()
        .merge(documents::routes(state.clone()))
        .merge(upload::routes(state.clone()))
        .merge(process_file::routes(state.clone()))
        .merge(lab_reports::routes(state.clone()))
        .merge(medications::routes(state.clone()))
        .merge(chat::routes(state))
}

/// Public routes serving signed storage links
pub fn storage_routes(state: HealthState) -> Router {
    storage::routes(state)
}

/// Read a multipart file field, keeping at most `limit + 1` bytes in memory
///
/// The full size is still counted so oversized files can be reported with
/// their real size.
pub(crate) async fn read_file_field(field: &mut Field<'_>, limit: u64) -> HealthResult<IncomingFile> {
    let file_name = field
        .file_name()
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_default();

    let mut data = Vec::new();
    let mut size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| HealthError::Validation(format!("Failed to read file data: {}", e)))?
    {
        size += chunk.len() as u64;
        if size <= limit + 1 {
            data.extend_from_slice(&chunk);
        }
    }

    Ok(IncomingFile {
        file_name,
        content_type,
        data: data.into(),
        size,
    })
}

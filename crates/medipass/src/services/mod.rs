//! Services module - business logic layer

pub mod analysis;
pub mod chat;
pub mod document_service;
pub mod intake;
pub mod jobs;
pub mod lab_report_service;
pub mod medication_service;
pub mod storage;

pub use analysis::{
    parse_analysis_response, AnalysisPipeline, AnalysisProvider, AnalysisRequest, OpenAiAnalyzer,
    OpenAiSettings, UnconfiguredAnalyzer,
};
pub use chat::{offline_reply, ChatService, ChatStream, OpenAiChat};
pub use document_service::DocumentService;
pub use intake::LabIntake;
pub use jobs::{run_reaper, AnalysisQueue, AnalysisWorker};
pub use lab_report_service::LabReportService;
pub use medication_service::MedicationService;
pub use storage::{FilesystemStorage, ObjectStorage};

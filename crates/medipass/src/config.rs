//! Pipeline configuration

use serde::{Deserialize, Serialize};

/// 50 MB per uploaded file
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Tunables for the upload and analysis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum size of a single uploaded file in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum size of a whole upload request body in bytes
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Lifetime of signed download/preview URLs in seconds
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,

    /// Request timeout for the document upload route in seconds
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,

    /// Whether lab-tagged PDFs uploaded as documents are queued for analysis
    #[serde(default)]
    pub analyze_lab_documents: bool,

    /// Lab reports stuck in `processing` longer than this are failed
    #[serde(default = "default_processing_deadline")]
    pub processing_deadline_secs: u64,

    /// How often the stale-processing reaper runs
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Maximum number of concurrent analysis jobs
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Capacity of the in-process job channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_max_request_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_signed_url_ttl() -> u64 {
    300
}

fn default_upload_timeout() -> u64 {
    60
}

fn default_processing_deadline() -> u64 {
    15 * 60
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_request_bytes: default_max_request_bytes(),
            signed_url_ttl_secs: default_signed_url_ttl(),
            upload_timeout_secs: default_upload_timeout(),
            analyze_lab_documents: false,
            processing_deadline_secs: default_processing_deadline(),
            reaper_interval_secs: default_reaper_interval(),
            worker_concurrency: default_worker_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

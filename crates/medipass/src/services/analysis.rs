//! AI analysis of uploaded lab files
//!
//! A provider turns a signed file URL into raw model text; the pipeline
//! parses that text and drives the lab report through its states.

use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{HealthError, HealthResult};
use crate::models::{AnalysisResult, LabReport};
use crate::security::FileKind;
use crate::services::lab_report_service::LabReportService;
use crate::services::storage::ObjectStorage;

pub const ANALYSIS_PROMPT: &str = r#"You are a medical document assistant. Analyze the attached lab report and respond with a single JSON object with exactly two string keys:
  "summary": a plain-language summary for the patient. Call out values outside their reference ranges and group results by panel (complete blood count, basic or comprehensive metabolic panel, lipid panel, thyroid panel, liver function, kidney function, HbA1c and glucose, vitamins and minerals, urinalysis, other).
  "transcription": a faithful transcription of every test name, value, unit and reference range in the document, one result per line.
Do not give a diagnosis. Respond with JSON only."#;

/// Used when the model answers in prose instead of JSON
pub const TRANSCRIPTION_PLACEHOLDER: &str = "Transcription not available.";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").unwrap());

/// Input for a single analysis call
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub file_name: String,
    pub content_type: String,
    pub kind: FileKind,
    /// Short-lived signed URL of the stored file
    pub file_url: String,
}

/// LLM backend producing raw analysis text
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> HealthResult<String>;
}

/// OpenAI-compatible chat completions settings
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// Analyzer backed by an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    settings: OpenAiSettings,
}

impl OpenAiAnalyzer {
    pub fn new(settings: OpenAiSettings) -> HealthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| HealthError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    /// Content part carrying the file for the model
    async fn file_part(&self, request: &AnalysisRequest) -> HealthResult<Value> {
        if request.kind == FileKind::Image {
            return Ok(json!({
                "type": "image_url",
                "image_url": { "url": request.file_url }
            }));
        }

        let response = self.client.get(&request.file_url).send().await?;
        if !response.status().is_success() {
            return Err(HealthError::Storage(format!(
                "Failed to fetch {}: {}",
                request.file_name,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;

        if request.content_type.starts_with("text/") {
            return Ok(json!({
                "type": "text",
                "text": String::from_utf8_lossy(&bytes)
            }));
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(json!({
            "type": "file",
            "file": {
                "filename": request.file_name,
                "file_data": format!("data:{};base64,{}", request.content_type, encoded)
            }
        }))
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[async_trait]
impl AnalysisProvider for OpenAiAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> HealthResult<String> {
        let file_part = self.file_part(request).await?;
        let body = json!({
            "model": self.settings.model,
            "response_format": { "type": "json_object" },
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": ANALYSIS_PROMPT },
                    file_part
                ]
            }]
        });

        debug!(model = %self.settings.model, file_name = %request.file_name, "Requesting analysis");
        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.settings.api_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(HealthError::Ai(format!("API error {}: {}", status, error_text)));
        }

        let completion: CompletionResponse = response.json().await?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Provider used when no API key is configured
pub struct UnconfiguredAnalyzer;

#[async_trait]
impl AnalysisProvider for UnconfiguredAnalyzer {
    async fn analyze(&self, _request: &AnalysisRequest) -> HealthResult<String> {
        Err(HealthError::Ai("AI provider is not configured".to_string()))
    }
}

/// Turn raw model output into summary and transcription
///
/// Output that is not a JSON object with a `summary` string is kept whole as
/// the summary.
pub fn parse_analysis_response(raw: &str) -> HealthResult<AnalysisResult> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(HealthError::Ai("Empty response from AI provider".to_string()));
    }

    let unfenced = CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(unfenced) {
        if let Some(summary) = object
            .get("summary")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            let transcription = object
                .get("transcription")
                .and_then(Value::as_str)
                .unwrap_or(TRANSCRIPTION_PLACEHOLDER);
            return Ok(AnalysisResult {
                summary: summary.to_string(),
                transcription: transcription.to_string(),
            });
        }
    }

    Ok(AnalysisResult {
        summary: text.to_string(),
        transcription: TRANSCRIPTION_PLACEHOLDER.to_string(),
    })
}

/// Runs one lab report through `processing` to a terminal state
#[derive(Clone)]
pub struct AnalysisPipeline {
    lab_reports: LabReportService,
    storage: Arc<dyn ObjectStorage>,
    analyzer: Arc<dyn AnalysisProvider>,
    signed_url_ttl_secs: u64,
}

impl AnalysisPipeline {
    pub fn new(
        lab_reports: LabReportService,
        storage: Arc<dyn ObjectStorage>,
        analyzer: Arc<dyn AnalysisProvider>,
        signed_url_ttl_secs: u64,
    ) -> Self {
        Self {
            lab_reports,
            storage,
            analyzer,
            signed_url_ttl_secs,
        }
    }

    /// Analyze an `uploading` report; on failure the report ends in `error`
    pub async fn run(&self, lab_report_id: &str) -> HealthResult<LabReport> {
        let report = self.lab_reports.begin_processing(lab_report_id).await?;
        info!(lab_report_id, file_name = %report.file_name, "Analyzing lab report");

        match self.analyze(&report).await {
            Ok(result) => match self.lab_reports.complete(lab_report_id, &result).await {
                Ok(report) => Ok(report),
                Err(e) => {
                    self.record_failure(lab_report_id, &e).await;
                    Err(e)
                }
            },
            Err(e) => {
                self.record_failure(lab_report_id, &e).await;
                Err(e)
            }
        }
    }

    async fn analyze(&self, report: &LabReport) -> HealthResult<AnalysisResult> {
        let file_url = self
            .storage
            .signed_url(&report.file_path, self.signed_url_ttl_secs)
            .await?;
        let request = AnalysisRequest {
            file_name: report.file_name.clone(),
            content_type: report.content_type.clone(),
            kind: FileKind::from_file_name(&report.file_name),
            file_url,
        };
        let raw = self.analyzer.analyze(&request).await?;
        parse_analysis_response(&raw)
    }

    async fn record_failure(&self, lab_report_id: &str, error: &HealthError) {
        if let Err(e) = self.lab_reports.fail(lab_report_id, &error.to_string()).await {
            warn!(lab_report_id, error = %e, "Failed to mark lab report as error");
        }
    }
}

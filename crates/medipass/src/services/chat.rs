//! Health assistant chat with streaming completions and an offline fallback

use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{HealthError, HealthResult};
use crate::models::{ChatMessage, ChatRequest, ChatRole};
use crate::services::analysis::OpenAiSettings;

pub const CHAT_SYSTEM_PROMPT: &str = "You are Healie, a friendly assistant inside a personal health record app. \
Help the user understand their medications, lab results and documents in plain language. \
You are not a doctor: do not diagnose, and suggest contacting a healthcare professional for medical decisions \
or urgent symptoms.";

const MAX_SSE_BUFFER_SIZE: usize = 1024 * 1024;

/// Stream of completion text deltas
pub type ChatStream = BoxStream<'static, HealthResult<String>>;

/// One decoded `data:` payload from an OpenAI-style event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Delta(String),
    Done,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Incremental decoder for chunked `text/event-stream` bodies
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; only complete
/// lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> HealthResult<Vec<SseData>> {
        if self.buffer.len() + chunk.len() > MAX_SSE_BUFFER_SIZE {
            return Err(HealthError::Ai("SSE buffer exceeded maximum size".to_string()));
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseData::Done);
                continue;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => {
                    for choice in chunk.choices {
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            events.push(SseData::Delta(content));
                        }
                    }
                }
                Err(e) => debug!(error = %e, "Skipping undecodable stream chunk"),
            }
        }
        Ok(events)
    }
}

/// Streaming client for an OpenAI-compatible chat endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    settings: OpenAiSettings,
}

impl OpenAiChat {
    pub fn new(settings: OpenAiSettings) -> HealthResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HealthError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    /// Send the request; errors before the first byte are returned here
    pub async fn start(&self, messages: Vec<ChatMessage>) -> HealthResult<ChatStream> {
        let body = json!({
            "model": self.settings.model,
            "stream": true,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.settings.api_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.settings.api_key)
            .timeout(self.settings.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(HealthError::Ai(format!("API error {}: {}", status, error_text)));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(HealthError::Ai(format!("Stream error: {}", e)));
                        return;
                    }
                };
                match decoder.push(&chunk) {
                    Ok(events) => {
                        for event in events {
                            match event {
                                SseData::Delta(text) => yield Ok(text),
                                SseData::Done => return,
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Canned reply used when the model is unreachable
pub fn offline_reply(message: &str) -> String {
    let text = message.to_lowercase();
    let topic = if ["medication", "pill", "dose", "prescription"]
        .iter()
        .any(|k| text.contains(k))
    {
        "You can track doses from the Medications page. Each dose you record lowers the remaining pill count, and a course is marked completed when the last pill is taken. Ask your pharmacist or doctor about timing and interactions."
    } else if ["lab", "result", "blood", "test", "cholesterol", "glucose"]
        .iter()
        .any(|k| text.contains(k))
    {
        "Uploaded lab reports are analyzed automatically, and a summary and transcription appear on the report once processing finishes. Please review any out-of-range values with your doctor."
    } else if ["document", "upload", "file", "scan"]
        .iter()
        .any(|k| text.contains(k))
    {
        "You can upload PDFs, images, Word documents and text files up to 50 MB each, then organize them with categories, folders and tags."
    } else {
        "I can help with your medications, lab results and health documents."
    };

    format!(
        "I'm currently offline, so I can't give a personalized answer right now. {} If you have urgent symptoms, contact a healthcare professional or emergency services.",
        topic
    )
}

/// Chat entry point; never fails before streaming
pub struct ChatService {
    provider: Option<OpenAiChat>,
}

impl ChatService {
    pub fn new(provider: Option<OpenAiChat>) -> Self {
        Self { provider }
    }

    pub fn offline() -> Self {
        Self { provider: None }
    }

    pub async fn respond(&self, request: &ChatRequest) -> ChatStream {
        let last_message = request.last_user_message().unwrap_or_default().to_string();

        let Some(provider) = &self.provider else {
            debug!("No chat provider configured, replying offline");
            return offline_stream(&last_message);
        };

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: CHAT_SYSTEM_PROMPT.to_string(),
        });
        messages.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .cloned(),
        );

        match provider.start(messages).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Chat provider unavailable, replying offline");
                offline_stream(&last_message)
            }
        }
    }
}

fn offline_stream(message: &str) -> ChatStream {
    stream::iter(vec![Ok(offline_reply(message))]).boxed()
}

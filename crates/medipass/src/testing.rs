//! Shared test fixtures: in-memory database, storage, analyzer and app harness

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::config::PipelineConfig;
use crate::error::{HealthError, HealthResult};
use crate::migrations::run_migration;
use crate::models::{Document, IncomingFile, UploadMetadata};
use crate::routes::{api_routes, storage_routes, HealthState};
use crate::security::{validate_storage_path, UrlSigner};
use crate::services::{
    AnalysisProvider, AnalysisQueue, AnalysisRequest, ChatService, ObjectStorage,
};
use crate::AuthenticatedUserId;

/// Single-connection in-memory SQLite with the schema applied
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migration(&pool).await.unwrap();
    pool
}

pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    fail_deletes: AtomicBool,
    signer: UrlSigner,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
            signer: UrlSigner::new("test-secret"),
        }
    }
}

impl MemoryStorage {
    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, path: &str, data: &[u8], _content_type: &str) -> HealthResult<()> {
        validate_storage_path(path)?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> HealthResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| HealthError::DocumentNotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> HealthResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(HealthError::Storage("delete disabled".to_string()));
        }
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl_secs: u64) -> HealthResult<String> {
        let expires = chrono::Utc::now().timestamp() + ttl_secs as i64;
        let signature = self.signer.sign(path, expires)?;
        Ok(format!(
            "http://localhost/storage/{}?expires={}&signature={}",
            path, expires, signature
        ))
    }

    fn verify_signed_url(&self, path: &str, expires: i64, signature: &str) -> HealthResult<()> {
        self.signer
            .verify(path, expires, signature, chrono::Utc::now().timestamp())
    }
}

/// Analyzer returning a fixed reply or error and recording what it was asked
pub struct ScriptedAnalyzer {
    reply: Result<String, String>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedAnalyzer {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> Option<AnalysisRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> HealthResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply.clone().map_err(HealthError::Ai)
    }
}

/// Router over in-memory dependencies, driven with `oneshot`
pub struct TestApp {
    pub state: HealthState,
    router: Router,
    _receiver: mpsc::Receiver<String>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(PipelineConfig::default(), ScriptedAnalyzer::replying("")).await
    }

    pub async fn with_config(config: PipelineConfig) -> Self {
        Self::build(config, ScriptedAnalyzer::replying("")).await
    }

    pub async fn with_analyzer(analyzer: ScriptedAnalyzer) -> Self {
        Self::build(PipelineConfig::default(), analyzer).await
    }

    async fn build(config: PipelineConfig, analyzer: ScriptedAnalyzer) -> Self {
        let pool = test_pool().await;
        let (queue, receiver) = AnalysisQueue::channel(pool.clone(), config.queue_capacity);
        let state = HealthState::new(
            pool,
            Arc::new(MemoryStorage::default()),
            config,
            queue,
            Arc::new(analyzer),
            ChatService::offline(),
        );
        let router = Router::new()
            .nest("/api", api_routes(state.clone()))
            .merge(storage_routes(state.clone()));
        Self {
            state,
            router,
            _receiver: receiver,
        }
    }

    pub async fn send(&self, user_id: &str, mut request: Request<Body>) -> Response<Body> {
        request
            .extensions_mut()
            .insert(AuthenticatedUserId(user_id.to_string()));
        self.anonymous(request).await
    }

    pub async fn anonymous(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn seed_document(&self, user_id: &str, file_name: &str) -> Document {
        let file = IncomingFile::new(file_name, "application/pdf", b"%PDF-1.4 test".to_vec());
        self.state
            .documents
            .ingest(
                user_id,
                file,
                &UploadMetadata::default(),
                self.state.config.max_file_size,
            )
            .await
            .unwrap()
    }

    pub async fn json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub async fn text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}

/// Encode `(field, file name, content type, bytes)` parts plus optional metadata JSON
pub fn multipart_body(
    files: &[(&str, &str, &str, &[u8])],
    metadata: Option<&str>,
) -> (String, Vec<u8>) {
    let boundary = "medipass-test-boundary".to_string();
    let mut body = Vec::new();
    for (field, file_name, content_type, data) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                boundary, field, file_name, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(metadata) = metadata {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{}\r\n",
                boundary, metadata
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    (boundary, body)
}

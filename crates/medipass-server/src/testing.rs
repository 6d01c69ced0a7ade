//! Test fixtures for the server binary

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use medipass::security::UrlSigner;
use medipass::services::{AnalysisQueue, ChatService, FilesystemStorage, UnconfiguredAnalyzer};
use medipass::HealthState;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::config::Config;
use crate::state::AppState;

/// In-memory SQLite with health record and auth tables
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    medipass::migrations::run_migration(&pool).await.unwrap();
    crate::auth::migrations::run_migration(&pool).await.unwrap();
    Arc::new(pool)
}

pub struct TestServer {
    router: Router,
    _storage_dir: tempfile::TempDir,
    _receiver: mpsc::Receiver<String>,
}

impl TestServer {
    pub async fn new() -> Self {
        let pool = test_pool().await;
        let config = Config::default();
        let storage_dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(
            storage_dir.path(),
            UrlSigner::new("test-secret"),
            config.public_base_url(),
        );
        let (queue, receiver) =
            AnalysisQueue::channel(pool.as_ref().clone(), config.pipeline.queue_capacity);
        let health = HealthState::new(
            pool.as_ref().clone(),
            Arc::new(storage),
            config.pipeline.clone(),
            queue,
            Arc::new(UnconfiguredAnalyzer),
            ChatService::offline(),
        );
        let state = Arc::new(AppState {
            pool,
            config,
            health,
        });

        Self {
            router: crate::build_router(state).unwrap(),
            _storage_dir: storage_dir,
            _receiver: receiver,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Register a user and return their API key
    pub async fn register(&self, email: &str) -> String {
        let response = self
            .request(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({ "email": email, "display_name": "Test" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        Self::json(response).await["api_key"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

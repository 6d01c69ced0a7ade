//! MediPass server - personal health record backend
//!
//! Wires the `medipass` health record routes behind API key / session
//! authentication and runs the lab analysis worker and reaper.

mod auth;
mod config;
mod state;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use medipass::security::UrlSigner;
use medipass::services::{
    run_reaper, AnalysisProvider, AnalysisQueue, AnalysisWorker, ChatService, FilesystemStorage,
    OpenAiAnalyzer, OpenAiChat, OpenAiSettings, UnconfiguredAnalyzer,
};
use medipass::HealthState;
use rand::Rng;
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::middleware::auth_middleware;
use crate::config::Config;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "medipass-server", version, about = "MediPass health record server")]
struct Cli {
    /// TOML configuration file; environment variables are used when omitted
    #[arg(long, env = "MEDIPASS_CONFIG")]
    config: Option<String>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "medipass_server=info,medipass=info,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|s| s.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    info!("Starting MediPass server on {}:{}", config.host, config.port);

    // Ensure parent directory exists for SQLite
    let database_url = config.database_url.clone();
    let db_path = database_url
        .trim_start_matches("sqlite:")
        .trim_start_matches("//");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .with_context(|| format!("Failed to connect to {}", database_url))?;

    info!("Running database migrations...");
    medipass::migrations::run_migration(&pool).await?;
    auth::migrations::run_migration(&pool).await?;
    info!("Database migrations completed");

    let secret = match &config.url_signing_secret {
        Some(secret) => secret.clone(),
        None => {
            warn!("URL_SIGNING_SECRET not set; storage links will not survive a restart");
            rand::thread_rng()
                .sample_iter(&rand::distributions::Alphanumeric)
                .take(48)
                .map(char::from)
                .collect()
        }
    };
    let storage = FilesystemStorage::new(
        &config.storage_root,
        UrlSigner::new(secret),
        config.public_base_url(),
    );
    storage.validate().await?;
    info!(root = %config.storage_root, "Object storage ready");

    let (analyzer, chat) = build_ai(&config)?;

    let (queue, receiver) = AnalysisQueue::channel(pool.clone(), config.pipeline.queue_capacity);
    let health = HealthState::new(
        pool.clone(),
        Arc::new(storage),
        config.pipeline.clone(),
        queue.clone(),
        analyzer,
        chat,
    );

    // Background tasks
    let shutdown = CancellationToken::new();
    let worker = AnalysisWorker::new(
        pool.clone(),
        health.pipeline.clone(),
        config.pipeline.worker_concurrency,
    );
    let worker_handle = tokio::spawn(worker.run(receiver, shutdown.clone()));
    let reaper_handle = tokio::spawn(run_reaper(
        health.lab_reports.clone(),
        Duration::from_secs(config.pipeline.processing_deadline_secs),
        Duration::from_secs(config.pipeline.reaper_interval_secs),
        shutdown.clone(),
    ));

    let requeued = queue.recover_pending().await?;
    if requeued > 0 {
        info!(requeued, "Re-queued pending analysis jobs");
    }

    let pool = Arc::new(pool);
    match auth::session::SessionService::new(pool.clone())
        .cleanup_expired()
        .await
    {
        Ok(removed) if removed > 0 => info!(removed, "Removed expired sessions"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to clean up expired sessions"),
    }

    let state = Arc::new(AppState {
        pool,
        config: config.clone(),
        health,
    });
    let app = build_router(state)?;

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(worker_handle, reaper_handle);
    info!("Server stopped");

    Ok(())
}

/// Analysis provider and chat service; without an API key both degrade
fn build_ai(config: &Config) -> Result<(Arc<dyn AnalysisProvider>, ChatService)> {
    let Some(api_key) = config.ai_api_key.clone() else {
        warn!("AI_API_KEY not set; lab analysis will fail and chat replies offline");
        return Ok((Arc::new(UnconfiguredAnalyzer), ChatService::offline()));
    };

    let analyzer = OpenAiAnalyzer::new(OpenAiSettings {
        api_url: config.ai_api_url.clone(),
        api_key: api_key.clone(),
        model: config.ai_model.clone(),
        timeout: config.ai_timeout(),
    })?;
    let chat = OpenAiChat::new(OpenAiSettings {
        api_url: config.ai_api_url.clone(),
        api_key,
        model: config.chat_model.clone(),
        timeout: config.ai_timeout(),
    })?;
    info!(model = %config.ai_model, chat_model = %config.chat_model, "AI provider configured");

    Ok((Arc::new(analyzer), ChatService::new(Some(chat))))
}

fn cors_layer(config: &Config) -> Result<CorsLayer> {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| HeaderValue::from_str(s).with_context(|| format!("Invalid CORS origin: {}", s)))
        .collect::<Result<_>>()?;

    if origins.is_empty() {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_credentials(true))
}

fn build_router(state: Arc<AppState>) -> Result<Router> {
    let cors = cors_layer(&state.config)?;

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/auth/register", post(auth::routes::register))
        .route("/api/auth/login", post(auth::routes::login))
        .route("/api/auth/logout", post(auth::routes::logout))
        .with_state(state.clone());

    let protected_auth_routes = auth::routes::protected_router().with_state(state.clone());

    // Health record routes and account routes share the auth middleware
    let protected_api = medipass::api_routes(state.health.clone())
        .nest("/auth", protected_auth_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Ok(Router::new()
        .merge(public_routes)
        .merge(medipass::storage_routes(state.health.clone()))
        .nest("/api", protected_api)
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

async fn root() -> &'static str {
    "MediPass Server"
}

async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match sqlx::query("SELECT 1").fetch_one(state.pool.as_ref()).await {
        Ok(_) => Ok(Json(serde_json::json!({
            "status": "healthy",
            "database": "connected",
            "version": env!("CARGO_PKG_VERSION")
        }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

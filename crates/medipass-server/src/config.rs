//! Configuration management for the MediPass server

use anyhow::{Context, Result};
use medipass::PipelineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Maximum database connections (default: 10)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Directory holding uploaded objects
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Externally reachable base URL, used for signed storage links.
    /// If not set, derived from host and port.
    pub base_url: Option<String>,

    /// Secret for signing storage links. A random one is generated when unset,
    /// which invalidates outstanding links on restart.
    pub url_signing_secret: Option<String>,

    /// CORS allowed origins (comma-separated). If empty, any origin is allowed.
    pub cors_allowed_origins: Option<String>,

    /// Whether to set Secure flag on cookies (default: false)
    #[serde(default)]
    pub secure_cookies: bool,

    /// OpenAI-compatible API base URL
    #[serde(default = "default_ai_api_url")]
    pub ai_api_url: String,

    /// API key for analysis and chat; both degrade gracefully when unset
    pub ai_api_key: Option<String>,

    /// Model used for lab report analysis
    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    /// Model used for the assistant chat
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Per-request timeout for AI calls in seconds (default: 120)
    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,

    /// Upload and analysis pipeline tunables
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "sqlite://./data/medipass.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_storage_root() -> String {
    "./data/storage".to_string()
}

fn default_ai_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    120
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|s| {
        let s = s.trim();
        s.eq_ignore_ascii_case("true") || s == "1"
    })
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_file_size: env_parse::<u64>("MAX_FILE_SIZE_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_file_size),
            max_request_bytes: env_parse::<usize>("MAX_UPLOAD_REQUEST_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_request_bytes),
            signed_url_ttl_secs: env_parse("SIGNED_URL_TTL_SECS")
                .unwrap_or(defaults.signed_url_ttl_secs),
            upload_timeout_secs: env_parse("UPLOAD_TIMEOUT_SECS")
                .unwrap_or(defaults.upload_timeout_secs),
            analyze_lab_documents: env_flag("ANALYZE_LAB_DOCUMENTS")
                .unwrap_or(defaults.analyze_lab_documents),
            processing_deadline_secs: env_parse("PROCESSING_DEADLINE_SECS")
                .unwrap_or(defaults.processing_deadline_secs),
            reaper_interval_secs: env_parse("REAPER_INTERVAL_SECS")
                .unwrap_or(defaults.reaper_interval_secs),
            worker_concurrency: env_parse("WORKER_CONCURRENCY")
                .unwrap_or(defaults.worker_concurrency),
            queue_capacity: env_parse("JOB_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
        };

        let config = Self {
            host: std::env::var("MEDIPASS_HOST").unwrap_or_else(|_| default_host()),
            port: env_parse("MEDIPASS_PORT").unwrap_or_else(default_port),
            database_url: std::env::var("DATABASE_URL").unwrap_or_else(|_| default_database_url()),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(default_max_connections),
            storage_root: std::env::var("STORAGE_ROOT").unwrap_or_else(|_| default_storage_root()),
            base_url: std::env::var("BASE_URL").ok(),
            url_signing_secret: std::env::var("URL_SIGNING_SECRET").ok(),
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS").ok(),
            secure_cookies: env_flag("SECURE_COOKIES").unwrap_or(false),
            ai_api_url: std::env::var("AI_API_URL").unwrap_or_else(|_| default_ai_api_url()),
            ai_api_key: std::env::var("AI_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok()
                .filter(|s| !s.trim().is_empty()),
            ai_model: std::env::var("AI_MODEL").unwrap_or_else(|_| default_ai_model()),
            chat_model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| default_chat_model()),
            ai_timeout_secs: env_parse("AI_TIMEOUT_SECS").unwrap_or_else(default_ai_timeout_secs),
            pipeline,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.database_url.starts_with("sqlite:") {
            anyhow::bail!(
                "Invalid DATABASE_URL '{}'. Only sqlite: URLs are supported",
                self.database_url
            );
        }
        if self.pipeline.max_file_size == 0 {
            anyhow::bail!("MAX_FILE_SIZE_MB must be greater than zero");
        }
        Ok(())
    }

    /// Base URL that signed storage links point at
    pub fn public_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
                format!("http://{}:{}", host, self.port)
            }
        }
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            storage_root: default_storage_root(),
            base_url: None,
            url_signing_secret: None,
            cors_allowed_origins: None,
            secure_cookies: false,
            ai_api_url: default_ai_api_url(),
            ai_api_key: None,
            ai_model: default_ai_model(),
            chat_model: default_chat_model(),
            ai_timeout_secs: default_ai_timeout_secs(),
            pipeline: PipelineConfig::default(),
        }
    }
}

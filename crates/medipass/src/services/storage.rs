//! Object storage for uploaded files
//!
//! Objects are addressed by `{user_id}/{timestamp_ms}_{name}` keys. Reads by
//! third parties (the AI provider, browsers) go through signed, expiring URLs.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{HealthError, HealthResult};
use crate::security::{validate_storage_path, UrlSigner};

/// Storage backend for raw file bytes
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `path`, replacing any existing object
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> HealthResult<()>;

    async fn get(&self, path: &str) -> HealthResult<Vec<u8>>;

    /// Remove the object; a missing object is not an error
    async fn delete(&self, path: &str) -> HealthResult<()>;

    /// URL that grants read access to `path` for `ttl_secs`
    async fn signed_url(&self, path: &str, ttl_secs: u64) -> HealthResult<String>;

    /// Check a signature previously produced by [`ObjectStorage::signed_url`]
    fn verify_signed_url(&self, path: &str, expires: i64, signature: &str) -> HealthResult<()>;
}

/// Local filesystem backend
///
/// Signed URLs point back at this server's `/storage/{path}` route.
pub struct FilesystemStorage {
    root: PathBuf,
    signer: UrlSigner,
    public_base_url: String,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            signer,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn full_path(&self, path: &str) -> HealthResult<PathBuf> {
        validate_storage_path(path)?;
        Ok(self.root.join(path))
    }

    /// Create the root directory and check it is writable
    pub async fn validate(&self) -> HealthResult<()> {
        let probe = self.root.join(".health-check");
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| HealthError::Storage(format!("create_dir_all({:?}): {}", self.root, e)))?;
        fs::write(&probe, b"ok")
            .await
            .map_err(|e| HealthError::Storage(format!("write({:?}): {}", probe, e)))?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for FilesystemStorage {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> HealthResult<()> {
        let full_path = self.full_path(path)?;
        debug!(storage_path = %path, size = data.len(), content_type, "storage: put");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "storage: create_dir_all failed");
                HealthError::Storage(format!("Failed to create directory: {}", e))
            })?;
        }

        // Write to a temp file and rename so readers never see partial objects
        let mut temp_path = full_path.clone().into_os_string();
        temp_path.push(".part");
        let temp_path = PathBuf::from(temp_path);
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| HealthError::Storage(format!("Failed to create file: {}", e)))?;
        file.write_all(data)
            .await
            .map_err(|e| HealthError::Storage(format!("Failed to write file: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| HealthError::Storage(format!("Failed to sync file: {}", e)))?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(to = %full_path.display(), error = %e, "storage: rename failed");
            HealthError::Storage(format!("Failed to store file: {}", e))
        })?;
        Ok(())
    }

    async fn get(&self, path: &str) -> HealthResult<Vec<u8>> {
        let full_path = self.full_path(path)?;
        fs::read(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HealthError::DocumentNotFound(path.to_string()),
            _ => HealthError::Storage(format!("Failed to read {}: {}", path, e)),
        })
    }

    async fn delete(&self, path: &str) -> HealthResult<()> {
        let full_path = self.full_path(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HealthError::Storage(format!("Failed to delete {}: {}", path, e))),
        }
    }

    async fn signed_url(&self, path: &str, ttl_secs: u64) -> HealthResult<String> {
        validate_storage_path(path)?;
        let expires = chrono::Utc::now().timestamp() + ttl_secs as i64;
        let signature = self.signer.sign(path, expires)?;
        Ok(format!(
            "{}/storage/{}?expires={}&signature={}",
            self.public_base_url, path, expires, signature
        ))
    }

    fn verify_signed_url(&self, path: &str, expires: i64, signature: &str) -> HealthResult<()> {
        self.signer
            .verify(path, expires, signature, chrono::Utc::now().timestamp())
    }
}

//! Upload validation and storage path utilities

use crate::error::{HealthError, HealthResult};
use crate::models::IncomingFile;
use chrono::Utc;
use regex::Regex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::LazyLock;

/// MIME types accepted for health documents
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/heic",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic", "bmp"];

/// Anything outside this set is replaced when building a storage key
static UNSAFE_FILE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// How the analysis prompt should treat a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Document,
}

impl FileKind {
    /// Classify by file extension
    pub fn from_file_name(file_name: &str) -> Self {
        let extension = get_extension(file_name);
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            FileKind::Image
        } else {
            FileKind::Document
        }
    }
}

/// Lowercased extension without the dot, or empty
pub fn get_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && !ext.contains(' '))
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

/// Effective MIME type of an upload
///
/// Clients frequently send `application/octet-stream` or nothing at all; the
/// extension decides in that case.
pub fn resolve_mime_type(file_name: &str, declared: &str) -> String {
    let declared = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if declared.is_empty() || declared == "application/octet-stream" {
        if let Some(guess) = mime_guess::from_path(file_name).first() {
            return guess.essence_str().to_string();
        }
    }
    declared
}

pub fn is_allowed_mime_type(mime_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime_type)
}

/// Check type and size of an incoming file; returns the resolved MIME type
pub fn validate_upload(file: &IncomingFile, max_file_size: u64) -> HealthResult<String> {
    let mime_type = resolve_mime_type(&file.file_name, &file.content_type);
    if !is_allowed_mime_type(&mime_type) {
        return Err(HealthError::UnsupportedFileType {
            file_name: file.file_name.clone(),
            mime_type,
        });
    }

    if file.size > max_file_size {
        return Err(HealthError::FileTooLarge {
            file_name: file.file_name.clone(),
            size: file.size,
            limit_mb: max_file_size / (1024 * 1024),
        });
    }

    if file.size == 0 {
        return Err(HealthError::Validation(format!(
            "File '{}' is empty",
            file.file_name
        )));
    }

    Ok(mime_type)
}

/// Make a client-supplied name safe to embed in a storage key
pub fn sanitize_file_name(file_name: &str) -> String {
    // Browsers on Windows may send the full client path
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let sanitized = UNSAFE_FILE_NAME_CHARS.replace_all(base, "_");
    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.chars().take(120).collect()
    }
}

/// Storage key for a user's upload: `{user_id}/{timestamp_ms}_{sanitized_name}`
pub fn storage_path(user_id: &str, timestamp_ms: i64, file_name: &str) -> String {
    format!("{}/{}_{}", user_id, timestamp_ms, sanitize_file_name(file_name))
}

/// Last timestamp handed out by [`next_storage_path`], shared by every caller
/// in the process
static LAST_KEY_TIMESTAMP_MS: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp for storage keys, strictly increasing across the
/// process so two uploads of the same name never share a key
fn next_key_timestamp_ms() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = match LAST_KEY_TIMESTAMP_MS.fetch_update(
        Ordering::SeqCst,
        Ordering::SeqCst,
        |last| Some(now.max(last + 1)),
    ) {
        Ok(previous) | Err(previous) => previous,
    };
    now.max(previous + 1)
}

/// Fresh storage key for a new upload
pub fn next_storage_path(user_id: &str, file_name: &str) -> String {
    storage_path(user_id, next_key_timestamp_ms(), file_name)
}

/// Reject storage keys that could escape the storage root
pub fn validate_storage_path(path: &str) -> HealthResult<()> {
    if path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
        || path.split('/').any(|segment| segment == ".." || segment.is_empty())
    {
        return Err(HealthError::Validation(format!(
            "Invalid storage path: {}",
            path
        )));
    }
    Ok(())
}

//! File proxy upload handling
//!
//! - Enforce the per-file size limit before touching storage
//! - Store under a random name so uploads never collide or overwrite
//! - Keep the user's filename, sanitized, as a readable suffix
//! - Content type is derived from the extension when serving

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

/// Configuration for file uploads
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum file size in bytes
    pub max_file_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 25 * 1024 * 1024, // 25MB
        }
    }
}

/// Result of storing an uploaded file
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Blob name, relative to the store
    pub storage_path: String,
    /// Original filename provided by user (sanitized)
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
}

/// Validate and store one uploaded file
pub async fn store_upload(
    store: &dyn BlobStore,
    data: &[u8],
    original_name: &str,
    config: &UploadConfig,
) -> Result<StoredFile> {
    if data.is_empty() {
        return Err(AppError::BadRequest("File is empty".to_string()));
    }
    if data.len() > config.max_file_size {
        return Err(AppError::PayloadTooLarge(format!(
            "File too large: {} bytes (max: {} bytes)",
            data.len(),
            config.max_file_size
        )));
    }

    let file_name = sanitize_filename(original_name);
    let storage_path = format!("{}-{}", Uuid::new_v4(), file_name);
    store.put(&storage_path, data).await?;

    tracing::debug!("Stored upload {} ({} bytes)", storage_path, data.len());

    Ok(StoredFile {
        file_type: content_type_for(&file_name),
        storage_path,
        file_name,
        file_size: data.len() as i64,
    })
}

/// MIME type to serve a blob with
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Sanitize filename to prevent path traversal
pub fn sanitize_filename(name: &str) -> String {
    // Get just the filename, no path components
    let name = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .take(100)
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() || cleaned.contains("..") {
        "file".to_string()
    } else {
        cleaned
    }
}

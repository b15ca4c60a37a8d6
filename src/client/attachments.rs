//! Attachment sequencing
//!
//! Upload is blob first, then row. Delete is rows fetched, blobs deleted,
//! rows deleted, and only then the parent. A blob that fails to delete is
//! logged and left for the server's orphan sweep; a row is never left
//! pointing at a blob that was removed.

use uuid::Uuid;

use super::{Backend, ClientError, ClientResult};
use crate::files::content_type_for;
use crate::models::{Attachment, NewAttachment, ParentType};

/// Per-submission limit applied before anything is sent (25 MiB)
pub const DEFAULT_SUBMISSION_LIMIT: u64 = 25 * 1024 * 1024;

/// Matches the server's default `MAX_FILE_SIZE`
pub const DEFAULT_FILE_LIMIT: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionLimits {
    /// All files of one post or comment together
    pub total: u64,
    /// Any single file
    pub per_file: u64,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self { total: DEFAULT_SUBMISSION_LIMIT, per_file: DEFAULT_FILE_LIMIT }
    }
}

/// A file picked by the user but not uploaded yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl PendingFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { file_name: file_name.into(), bytes }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

fn megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// Check a submission against the size limits without touching the network
pub fn validate_submission(files: &[PendingFile], limits: SubmissionLimits) -> ClientResult<()> {
    if let Some(empty) = files.iter().find(|f| f.bytes.is_empty()) {
        return Err(ClientError::Validation(format!("'{}' is empty", empty.file_name)));
    }
    if let Some(large) = files.iter().find(|f| f.size() > limits.per_file) {
        return Err(ClientError::Validation(format!(
            "'{}' is {}, the limit per file is {}",
            large.file_name,
            megabytes(large.size()),
            megabytes(limits.per_file)
        )));
    }
    let total: u64 = files.iter().map(PendingFile::size).sum();
    if total > limits.total {
        return Err(ClientError::Validation(format!(
            "Attachments total {}, the limit is {}",
            megabytes(total),
            megabytes(limits.total)
        )));
    }
    Ok(())
}

/// Upload each file through the proxy and record it against the parent.
/// Callers validate first.
pub async fn upload_all(
    backend: &dyn Backend,
    parent_type: ParentType,
    parent_id: Uuid,
    files: Vec<PendingFile>,
) -> ClientResult<Vec<Attachment>> {
    let mut rows = Vec::with_capacity(files.len());
    for file in files {
        let file_size = file.size() as i64;
        let file_type = content_type_for(&file.file_name);
        let uploaded = backend.upload_file(&file.file_name, file.bytes).await?;

        let row = backend
            .insert_attachment(&NewAttachment {
                parent_type,
                parent_id,
                storage_path: uploaded.storage_path,
                file_name: file.file_name,
                file_type,
                file_size,
            })
            .await?;
        rows.push(row);
    }
    Ok(rows)
}

/// Delete blobs, then rows
pub async fn discard(backend: &dyn Backend, rows: &[Attachment]) -> ClientResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for row in rows {
        if let Err(e) = backend.delete_file(&row.storage_path).await {
            tracing::warn!("Failed to delete blob {}: {}", row.storage_path, e);
        }
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    backend.delete_attachments(&ids).await
}

/// Remove a post's files and its comments' files, then the post
pub async fn delete_post_cascade(backend: &dyn Backend, post_id: Uuid) -> ClientResult<()> {
    let mut rows = backend.list_attachments(ParentType::Post, post_id).await?;
    for comment in backend.list_comments(post_id).await? {
        rows.extend(backend.list_attachments(ParentType::Comment, comment.id).await?);
    }
    discard(backend, &rows).await?;
    backend.delete_post(post_id).await
}

/// Remove a comment's files, then soft-delete the comment
pub async fn delete_comment_cascade(backend: &dyn Backend, comment_id: Uuid) -> ClientResult<()> {
    let rows = backend.list_attachments(ParentType::Comment, comment_id).await?;
    discard(backend, &rows).await?;
    backend.delete_comment(comment_id).await
}

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, Result},
    feed::{ChangeKind, Record},
    models::{Attachment, AttachmentQuery, DeleteAttachmentsRequest, NewAttachment},
    storage::validate_blob_name,
    AppState,
};

/// Attachment rows of one post or comment
pub async fn list_attachments(
    State(state): State<AppState>,
    Query(query): Query<AttachmentQuery>,
) -> Result<Json<Vec<Attachment>>> {
    let rows = state.db.list_attachments(query.parent_type, query.parent_id).await?;
    Ok(Json(rows))
}

/// Record an uploaded blob against a post or comment. Only the parent's
/// author may attach files to it, only files they uploaded, and each file
/// only once.
pub async fn create_attachment(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(new): Json<NewAttachment>,
) -> Result<Json<Attachment>> {
    validate_blob_name(&new.storage_path)?;
    if new.file_name.trim().is_empty() {
        return Err(AppError::BadRequest("file_name is required".to_string()));
    }
    if new.file_size < 0 || new.file_size as u64 > state.upload_config.max_file_size as u64 {
        return Err(AppError::BadRequest(format!(
            "file_size must be between 0 and {} bytes",
            state.upload_config.max_file_size
        )));
    }

    let scope = state.db.attachment_parent_scope(new.parent_type, new.parent_id).await?;
    if scope.author_id != auth.id {
        return Err(AppError::Forbidden(format!(
            "Only the author can attach files to this {}",
            new.parent_type
        )));
    }

    match state.db.upload_owner(&new.storage_path).await? {
        Some(uploader) if uploader == auth.id => {}
        Some(_) => {
            return Err(AppError::Forbidden("Only the uploader can attach this file".to_string()));
        }
        None => return Err(AppError::NotFound(format!("File '{}' not found", new.storage_path))),
    }

    let row = state.db.insert_attachment(auth.id, &new).await?;
    state.feed.publish(
        ChangeKind::Insert,
        scope.board_id,
        Some(scope.post_id),
        None,
        Record::Attachments(row.clone()),
    );

    Ok(Json(row))
}

/// Delete attachment rows. Blobs are removed separately through the file
/// proxy; anything left behind is swept by the orphan cleanup.
pub async fn delete_attachments(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(req): Json<DeleteAttachmentsRequest>,
) -> Result<StatusCode> {
    let scoped = state.db.scoped_attachments(&req.ids).await?;
    if let Some(denied) = scoped.iter().find(|a| !a.deletable_by(auth.id)) {
        return Err(AppError::Forbidden(format!(
            "Not allowed to delete attachment {}",
            denied.attachment.id
        )));
    }

    let ids: Vec<Uuid> = scoped.iter().map(|a| a.attachment.id).collect();
    state.db.delete_attachment_rows(&ids).await?;

    for row in scoped {
        if let Some(board_id) = row.scope_board_id {
            state.feed.publish(
                ChangeKind::Delete,
                board_id,
                row.scope_post_id,
                None,
                Record::Attachments(row.attachment),
            );
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Delete the blobs behind already-removed attachment rows and announce the
/// removals. Blob failures are logged and never fail the request.
pub(super) async fn discard_attachments(
    state: &AppState,
    board_id: Uuid,
    post_id: Option<Uuid>,
    removed: Vec<Attachment>,
) {
    let mut gone = Vec::new();
    for row in removed {
        match state.blobs.delete(&row.storage_path).await {
            Ok(()) => gone.push(row.storage_path.clone()),
            Err(e) => tracing::warn!("Failed to delete blob {}: {}", row.storage_path, e),
        }
        state.feed.publish(ChangeKind::Delete, board_id, post_id, None, Record::Attachments(row));
    }
    if let Err(e) = state.db.forget_uploads(&gone).await {
        tracing::warn!("Failed to forget {} uploads: {}", gone.len(), e);
    }
}

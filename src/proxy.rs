//! File proxy
//!
//! Thin HTTP front for the blob store, mounted at the root:
//! `POST /upload`, `GET /file/{name}` and `DELETE /file/{name}`.
//! Responses carry permissive CORS headers so any page can embed files.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, Result},
    files::{content_type_for, store_upload},
    models::UploadResponse,
    storage::validate_blob_name,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/file/{name}", get(get_file).delete(delete_file))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Store one file
///
/// Accepts multipart/form-data with fields:
/// - file: the file bytes (required)
/// - fileName: display name (optional, falls back to the part's filename)
pub async fn upload(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut file_data: Option<(Vec<u8>, String)> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let part_name = field.file_name().unwrap_or("file").to_string();
                let data = field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read file: {}", e))
                })?;
                file_data = Some((data.to_vec(), part_name));
            }
            "fileName" => {
                file_name = Some(field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read fileName: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let (bytes, part_name) =
        file_data.ok_or_else(|| AppError::BadRequest("file is required".to_string()))?;
    let display_name = file_name.filter(|n| !n.trim().is_empty()).unwrap_or(part_name);

    let stored = store_upload(state.blobs.as_ref(), &bytes, &display_name, &state.upload_config).await?;
    state.db.record_upload(&stored.storage_path, auth.id).await?;
    tracing::info!("User {} uploaded {} ({} bytes)", auth.id, stored.storage_path, stored.file_size);

    Ok(Json(UploadResponse { storage_path: stored.storage_path }))
}

/// Serve a blob with a content type guessed from its extension
pub async fn get_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    validate_blob_name(&name)?;
    let bytes = state.blobs.get(&name).await?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&name)),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        bytes,
    ))
}

/// Remove a blob. A blob referenced by attachment rows may only be removed
/// by someone allowed to delete every one of them; an unattached blob only
/// by its uploader.
pub async fn delete_file(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    validate_blob_name(&name)?;

    let referencing = state.db.scoped_attachments_for_blob(&name).await?;
    if referencing.is_empty() {
        match state.db.upload_owner(&name).await? {
            Some(uploader) if uploader == auth.id => {}
            Some(_) => return Err(AppError::Forbidden("Not allowed to delete this file".to_string())),
            None => return Err(AppError::NotFound(format!("File '{}' not found", name))),
        }
    } else if !referencing.iter().all(|a| a.deletable_by(auth.id)) {
        return Err(AppError::Forbidden("Not allowed to delete this file".to_string()));
    }

    state.blobs.delete(&name).await?;
    state.db.forget_uploads(std::slice::from_ref(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

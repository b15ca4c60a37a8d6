use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, Result},
    feed::{ChangeKind, Record},
    models::{validate_reaction_type, CreatePostRequest, PostResponse, ToggleOutcome, ToggleRequest},
    AppState,
};

use super::attachments::discard_attachments;

/// List a board's posts, newest first
pub async fn list_posts(
    State(state): State<AppState>,
    Path(url_path): Path<String>,
) -> Result<Json<Vec<PostResponse>>> {
    let board = state.db.get_board_by_path(&url_path).await?;
    let rows = state.db.list_board_posts(board.id).await?;
    let posts = state.db.post_responses(rows).await?;
    Ok(Json(posts))
}

/// Create a request on a board
pub async fn create_post(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(url_path): Path<String>,
    Json(req): Json<CreatePostRequest>,
) -> Result<Json<PostResponse>> {
    req.validate().map_err(AppError::BadRequest)?;

    let board = state.db.get_board_by_path(&url_path).await?;
    if let Some(color) = req.color.as_deref() {
        if !board.allows_color(color) {
            return Err(AppError::BadRequest(format!(
                "Color '{}' is not in this board's palette",
                color
            )));
        }
    }

    let row = state.db.create_post(board.id, auth.id, &req).await?;
    let post = state.db.post_response(row).await?.with_client_token(req.client_token);

    state.feed.publish(
        ChangeKind::Insert,
        board.id,
        Some(post.id),
        req.client_token,
        Record::Posts(post.clone()),
    );

    Ok(Json(post))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PostResponse>> {
    let row = state.db.get_post_row(id).await?;
    Ok(Json(state.db.post_response(row).await?))
}

/// Delete a post (author or board owner). Comments, reactions and
/// subscriptions cascade; attachment rows are removed with the post and
/// their blobs are discarded afterwards.
pub async fn delete_post(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let row = state.db.get_post_row(id).await?;
    let board = state.db.get_board(row.board_id).await?;
    if row.author_id != auth.id && board.owner_id != auth.id {
        return Err(AppError::Forbidden(
            "Only the author or the board owner can delete this post".to_string(),
        ));
    }

    let removed = state.db.delete_post(id).await?;
    discard_attachments(&state, board.id, Some(id), removed).await;

    let tombstone = PostResponse::from_row(row, None, Vec::new());
    state.feed.publish(ChangeKind::Delete, board.id, Some(id), None, Record::Posts(tombstone));
    tracing::info!("Post {} deleted from /{} by {}", id, board.url_path, auth.id);

    Ok(StatusCode::NO_CONTENT)
}

/// Toggle the caller's reaction on a post
pub async fn toggle_reaction(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<ToggleOutcome>> {
    let kind = req.kind();
    validate_reaction_type(kind).map_err(AppError::BadRequest)?;

    let result = state.db.toggle_post_reaction(id, auth.id, kind).await?;
    let board_id = result.target.board_id;

    let change = if result.outcome.liked { ChangeKind::Insert } else { ChangeKind::Delete };
    state.feed.publish(change, board_id, Some(id), None, Record::Reactions(result.reaction));

    let post = state.db.post_response(result.target).await?;
    state.feed.publish(ChangeKind::Update, board_id, Some(id), None, Record::Posts(post));

    Ok(Json(result.outcome))
}

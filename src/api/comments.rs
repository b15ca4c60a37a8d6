use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, MaybeUser},
    error::{AppError, Result},
    feed::{ChangeKind, Record},
    models::{
        validate_reaction_type, CommentResponse, CreateCommentRequest, MyReactions, ToggleOutcome,
        ToggleRequest,
    },
    AppState,
};

use super::attachments::discard_attachments;

/// All comments and replies of a post, oldest first. Deleted comments are
/// included (redacted) so their replies keep a parent.
pub async fn list_comments(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Vec<CommentResponse>>> {
    state.db.get_post_row(post_id).await?;
    let rows = state.db.list_post_comments(post_id).await?;
    Ok(Json(state.db.comment_responses_for(rows, viewer.id()).await?))
}

/// Comment on a post, or reply to a top-level comment
pub async fn create_comment(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<Json<CommentResponse>> {
    req.validate().map_err(AppError::BadRequest)?;

    let post = state.db.get_post_row(post_id).await?;
    let row = state.db.create_comment(post_id, auth.id, &req).await?;
    let comment = state.db.comment_response(row).await?.with_client_token(req.client_token);

    state.feed.publish(
        ChangeKind::Insert,
        post.board_id,
        Some(post_id),
        req.client_token,
        Record::Comments(comment.clone()),
    );
    publish_post_update(&state, post_id).await?;

    Ok(Json(CommentResponse { is_mine: true, ..comment }))
}

/// Soft delete (author or board owner). The row and its replies stay;
/// content and author are cleared from every response.
pub async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let row = state.db.get_comment_row(id).await?;
    if row.is_deleted {
        return Ok(StatusCode::NO_CONTENT);
    }

    let post = state.db.get_post_row(row.post_id).await?;
    let board = state.db.get_board(post.board_id).await?;
    if row.author_id != auth.id && board.owner_id != auth.id {
        return Err(AppError::Forbidden(
            "Only the author or the board owner can delete this comment".to_string(),
        ));
    }

    let (row, removed) = state.db.soft_delete_comment(id).await?;
    discard_attachments(&state, board.id, Some(post.id), removed).await;

    let comment = CommentResponse::from_row(row, None, Vec::new());
    state.feed.publish(ChangeKind::Update, board.id, Some(post.id), None, Record::Comments(comment));
    publish_post_update(&state, post.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Toggle the caller's reaction on a comment or reply
pub async fn toggle_reaction(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<ToggleOutcome>> {
    let kind = req.kind();
    validate_reaction_type(kind).map_err(AppError::BadRequest)?;

    let result = state.db.toggle_comment_reaction(id, auth.id, kind).await?;
    let post_id = result.target.post_id;
    let post = state.db.get_post_row(post_id).await?;

    let change = if result.outcome.liked { ChangeKind::Insert } else { ChangeKind::Delete };
    state.feed.publish(
        change,
        post.board_id,
        Some(post_id),
        None,
        Record::CommentReactions(result.reaction),
    );

    let comment = state.db.comment_response(result.target).await?;
    state.feed.publish(ChangeKind::Update, post.board_id, Some(post_id), None, Record::Comments(comment));

    Ok(Json(result.outcome))
}

/// The caller's reactions on every comment of a post
pub async fn my_reactions(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<MyReactions>> {
    let mine = state.db.my_comment_reactions(post_id, auth.id).await?;
    Ok(Json(mine))
}

/// Comment counts live on the post record
async fn publish_post_update(state: &AppState, post_id: Uuid) -> Result<()> {
    let row = state.db.get_post_row(post_id).await?;
    let board_id = row.board_id;
    let post = state.db.post_response(row).await?;
    state.feed.publish(ChangeKind::Update, board_id, Some(post_id), None, Record::Posts(post));
    Ok(())
}

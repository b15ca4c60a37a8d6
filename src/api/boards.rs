use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    auth::{AuthenticatedUser, MaybeUser},
    error::{AppError, Result},
    models::{validate_url_path, Board, CreateBoardRequest, MyReactions, UpdateBoardRequest},
    AppState,
};

/// List all boards
pub async fn list_boards(State(state): State<AppState>) -> Result<Json<Vec<Board>>> {
    let boards = state.db.list_boards().await?;
    Ok(Json(boards.into_iter().map(public_board).collect()))
}

/// Create a board owned by the caller
pub async fn create_board(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(mut req): Json<CreateBoardRequest>,
) -> Result<Json<Board>> {
    req.url_path = req.url_path.trim().to_lowercase();
    validate_url_path(&req.url_path).map_err(AppError::BadRequest)?;
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("title is required".to_string()));
    }

    let board = state.db.create_board(auth.id, &req).await?;
    tracing::info!("Created board /{} for {}", board.url_path, auth.id);

    Ok(Json(board))
}

/// Get a board by url path. The owner's notification address is only
/// returned to the owner.
pub async fn get_board(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(url_path): Path<String>,
) -> Result<Json<Board>> {
    let board = state.db.get_board_by_path(&url_path).await?;
    if viewer.id() == Some(board.owner_id) {
        return Ok(Json(board));
    }
    Ok(Json(public_board(board)))
}

/// Update board settings (owner only)
pub async fn update_board(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(url_path): Path<String>,
    Json(req): Json<UpdateBoardRequest>,
) -> Result<Json<Board>> {
    let board = state.db.get_board_by_path(&url_path).await?;
    if board.owner_id != auth.id {
        return Err(AppError::Forbidden("Only the board owner can edit this board".to_string()));
    }
    if let Some(title) = req.title.as_deref() {
        if title.trim().is_empty() {
            return Err(AppError::BadRequest("title cannot be empty".to_string()));
        }
    }

    let board = state.db.update_board(board.id, &req).await?;
    Ok(Json(board))
}

/// The caller's reactions on every post of the board
pub async fn my_reactions(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(url_path): Path<String>,
) -> Result<Json<MyReactions>> {
    let board = state.db.get_board_by_path(&url_path).await?;
    let mine = state.db.my_board_reactions(board.id, auth.id).await?;
    Ok(Json(mine))
}

fn public_board(mut board: Board) -> Board {
    board.owner_email = None;
    board
}

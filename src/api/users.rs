use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{AuthorInfo, RegisterRequest, RegisterResponse},
    AppState,
};

const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Register a user. The returned token is shown once.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>> {
    let name = req.display_name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("display_name is required".to_string()));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "display_name too long (max {} characters)",
            MAX_DISPLAY_NAME_LENGTH
        )));
    }
    if let Some(email) = req.email.as_deref() {
        if !email.contains('@') {
            return Err(AppError::BadRequest("Invalid email address".to_string()));
        }
    }

    let (user, token) = state.db.create_user(&req).await?;
    tracing::info!("Registered user {}", user.id);

    Ok(Json(RegisterResponse { user, token }))
}

/// Public profile
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuthorInfo>> {
    let user = state.db.get_user(id).await?;
    Ok(Json(user.author_info()))
}

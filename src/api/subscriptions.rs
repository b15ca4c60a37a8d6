use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::Result,
    feed::{ChangeKind, Record},
    models::SubscriptionStatus,
    AppState,
};

pub async fn get_subscription(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<SubscriptionStatus>> {
    let subscribed = state.db.is_subscribed(auth.id, post_id).await?;
    Ok(Json(SubscriptionStatus { subscribed }))
}

/// Opt in to notifications for a post (idempotent)
pub async fn subscribe(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<SubscriptionStatus>> {
    let post = state.db.get_post_row(post_id).await?;
    let (row, created) = state.db.subscribe(auth.id, post_id).await?;
    if created {
        state.feed.publish(
            ChangeKind::Insert,
            post.board_id,
            Some(post_id),
            None,
            Record::Subscriptions(row),
        );
    }
    Ok(Json(SubscriptionStatus { subscribed: true }))
}

/// Opt out (idempotent)
pub async fn unsubscribe(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<SubscriptionStatus>> {
    let post = state.db.get_post_row(post_id).await?;
    if let Some(row) = state.db.unsubscribe(auth.id, post_id).await? {
        state.feed.publish(
            ChangeKind::Delete,
            post.board_id,
            Some(post_id),
            None,
            Record::Subscriptions(row),
        );
    }
    Ok(Json(SubscriptionStatus { subscribed: false }))
}

mod attachments;
mod boards;
mod comments;
mod posts;
mod subscriptions;
mod users;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::AppState;

/// Build the API router
pub fn router() -> Router<AppState> {
    Router::new()
        // Users
        .route("/users", post(users::register))
        .route("/users/{id}", get(users::get_user))
        // Boards
        .route("/boards", get(boards::list_boards))
        .route("/boards", post(boards::create_board))
        .route("/boards/{url_path}", get(boards::get_board))
        .route("/boards/{url_path}", patch(boards::update_board))
        .route("/boards/{url_path}/posts", get(posts::list_posts))
        .route("/boards/{url_path}/posts", post(posts::create_post))
        .route("/boards/{url_path}/reactions/mine", get(boards::my_reactions))
        // Posts
        .route("/posts/{id}", get(posts::get_post))
        .route("/posts/{id}", delete(posts::delete_post))
        .route("/posts/{id}/reactions/toggle", post(posts::toggle_reaction))
        .route("/posts/{id}/comments", get(comments::list_comments))
        .route("/posts/{id}/comments", post(comments::create_comment))
        .route("/posts/{id}/comment-reactions/mine", get(comments::my_reactions))
        .route(
            "/posts/{id}/subscription",
            get(subscriptions::get_subscription)
                .put(subscriptions::subscribe)
                .delete(subscriptions::unsubscribe),
        )
        // Comments
        .route("/comments/{id}", delete(comments::delete_comment))
        .route("/comments/{id}/reactions/toggle", post(comments::toggle_reaction))
        // Attachment rows (blobs go through the file proxy)
        .route(
            "/attachments",
            get(attachments::list_attachments)
                .post(attachments::create_attachment)
                .delete(attachments::delete_attachments),
        )
}

//! Client-side view state
//!
//! Views hold what a page shows: a board's posts, a post's comments, the
//! board activity list. They apply local writes optimistically, merge
//! change-feed events as they arrive, and talk to the service through the
//! [`Backend`] trait. Each view is owned by one task and mutated through
//! `&mut self`.

pub mod activity;
pub mod attachments;
pub mod board_view;
pub mod http;
pub mod post_view;
pub mod toggle;

pub use activity::{ActivityEntry, ActivityKind, ActivityStream};
pub use attachments::{PendingFile, SubmissionLimits, DEFAULT_FILE_LIMIT, DEFAULT_SUBMISSION_LIMIT};
pub use board_view::{BoardView, PostDraft, PostSort};
pub use http::{FeedMessage, HttpBackend};
pub use post_view::{CommentDraft, PostView, ReplyListing};
pub use toggle::{ReactionState, Reactable};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Attachment, AuthorInfo, CommentResponse, CreateCommentRequest, CreatePostRequest, MyReactions,
    NewAttachment, ParentType, PostResponse, ToggleOutcome, UploadResponse,
};
use crate::notify::{SendEmailRequest, SendEmailResponse};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream: {0}")]
    Stream(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Everything the views need from the service
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_author(&self, user_id: Uuid) -> ClientResult<AuthorInfo>;

    async fn list_posts(&self, board_path: &str) -> ClientResult<Vec<PostResponse>>;
    async fn create_post(&self, board_path: &str, req: &CreatePostRequest) -> ClientResult<PostResponse>;
    async fn delete_post(&self, post_id: Uuid) -> ClientResult<()>;

    async fn list_comments(&self, post_id: Uuid) -> ClientResult<Vec<CommentResponse>>;
    async fn create_comment(&self, post_id: Uuid, req: &CreateCommentRequest) -> ClientResult<CommentResponse>;
    async fn delete_comment(&self, comment_id: Uuid) -> ClientResult<()>;

    async fn toggle_post_reaction(&self, post_id: Uuid, kind: &str) -> ClientResult<ToggleOutcome>;
    async fn toggle_comment_reaction(&self, comment_id: Uuid, kind: &str) -> ClientResult<ToggleOutcome>;
    async fn my_board_reactions(&self, board_path: &str) -> ClientResult<MyReactions>;
    async fn my_comment_reactions(&self, post_id: Uuid) -> ClientResult<MyReactions>;

    async fn list_attachments(&self, parent_type: ParentType, parent_id: Uuid) -> ClientResult<Vec<Attachment>>;
    async fn insert_attachment(&self, new: &NewAttachment) -> ClientResult<Attachment>;
    async fn delete_attachments(&self, ids: &[Uuid]) -> ClientResult<()>;

    /// File proxy
    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<UploadResponse>;
    async fn delete_file(&self, storage_path: &str) -> ClientResult<()>;

    async fn is_subscribed(&self, post_id: Uuid) -> ClientResult<bool>;
    async fn set_subscribed(&self, post_id: Uuid, subscribed: bool) -> ClientResult<bool>;

    async fn send_notification(&self, req: &SendEmailRequest) -> ClientResult<SendEmailResponse>;
}

/// Fire a notification; failures are logged only
pub(crate) async fn notify_best_effort(backend: &dyn Backend, req: SendEmailRequest) {
    match backend.send_notification(&req).await {
        Ok(outcome) if outcome.failed > 0 => {
            tracing::warn!("{:?} notification: {} of {} failed", req.kind, outcome.failed, outcome.sent + outcome.failed)
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to send {:?} notification: {}", req.kind, e),
    }
}

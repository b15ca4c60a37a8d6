use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Attachment, AuthorInfo, ReactionCounts};

/// A comment or reply - internal DB representation
#[derive(Debug, Clone, FromRow)]
pub struct CommentRow {
    pub id: Uuid,
    pub post_id: Uuid,
    /// NULL for top-level comments, set for replies (one level only)
    pub parent_comment_id: Option<Uuid>,
    pub content: String,
    pub author_id: Uuid,
    pub is_anonymous: bool,
    /// Soft delete flag; the row and its replies are kept
    pub is_deleted: bool,
    #[sqlx(json)]
    pub reaction_counts: ReactionCounts,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub client_token: Option<Uuid>,
}

/// Comment as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub post_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    /// Empty once soft-deleted
    pub content: String,
    /// Withheld for anonymous or deleted comments
    pub author_id: Option<Uuid>,
    pub author: Option<AuthorInfo>,
    pub is_anonymous: bool,
    pub is_deleted: bool,
    pub reaction_counts: ReactionCounts,
    pub likes_count: i64,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<Uuid>,
    /// The requesting user wrote this comment, anonymous or not. Never set
    /// on feed events.
    #[serde(default)]
    pub is_mine: bool,
}

impl CommentResponse {
    pub fn from_row(row: CommentRow, author: Option<&AuthorInfo>, attachments: Vec<Attachment>) -> Self {
        let hide_author = row.is_anonymous || row.is_deleted;
        let mut comment = CommentResponse {
            id: row.id,
            post_id: row.post_id,
            parent_comment_id: row.parent_comment_id,
            likes_count: row.reaction_counts.likes(),
            content: row.content,
            author_id: (!hide_author).then_some(row.author_id),
            author: if hide_author { None } else { author.cloned() },
            is_anonymous: row.is_anonymous,
            is_deleted: row.is_deleted,
            reaction_counts: row.reaction_counts,
            attachments,
            created_at: row.created_at,
            client_token: None,
            is_mine: false,
        };
        if comment.is_deleted {
            comment.redact();
        }
        comment
    }

    pub fn with_client_token(mut self, token: Option<Uuid>) -> Self {
        self.client_token = token;
        self
    }

    pub fn is_reply(&self) -> bool {
        self.parent_comment_id.is_some()
    }

    /// Clear everything a soft-deleted comment must not display
    pub fn redact(&mut self) {
        self.is_deleted = true;
        self.content.clear();
        self.author = None;
        self.author_id = None;
        self.attachments.clear();
    }

    pub fn set_reaction_count(&mut self, kind: &str, count: i64) {
        self.reaction_counts.set(kind, count);
        self.likes_count = self.reaction_counts.likes();
    }
}

pub const MAX_COMMENT_LENGTH: usize = 5_000;

impl CreateCommentRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.content.trim().is_empty() {
            return Err("content is required".to_string());
        }
        if self.content.chars().count() > MAX_COMMENT_LENGTH {
            return Err(format!("comment too long (max {} characters)", MAX_COMMENT_LENGTH));
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Attachment, AuthorInfo, ReactionCounts};

/// A request posted to a board - internal DB representation
#[derive(Debug, Clone, FromRow)]
pub struct PostRow {
    pub id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    pub content: String,
    pub color: Option<String>,
    pub is_anonymous: bool,
    pub author_id: Uuid,
    #[sqlx(json)]
    pub reaction_counts: ReactionCounts,
    pub created_at: DateTime<Utc>,
    /// Filled by list queries through a subselect
    #[sqlx(default)]
    pub comment_count: i64,
}

/// Request to create a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    pub color: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    /// Idempotency key echoed back on the change feed so the author's
    /// optimistic copy can be matched with the server record
    pub client_token: Option<Uuid>,
}

/// Post as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    pub content: String,
    pub color: Option<String>,
    pub is_anonymous: bool,
    /// Raw author id; withheld for anonymous posts
    pub author_id: Option<Uuid>,
    /// None when anonymous
    pub author: Option<AuthorInfo>,
    pub reaction_counts: ReactionCounts,
    pub likes_count: i64,
    pub comment_count: i64,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<Uuid>,
}

impl PostResponse {
    pub fn from_row(row: PostRow, author: Option<&AuthorInfo>, attachments: Vec<Attachment>) -> Self {
        let (author_id, author) = if row.is_anonymous {
            (None, None)
        } else {
            (Some(row.author_id), author.cloned())
        };

        PostResponse {
            id: row.id,
            board_id: row.board_id,
            likes_count: row.reaction_counts.likes(),
            title: row.title,
            content: row.content,
            color: row.color,
            is_anonymous: row.is_anonymous,
            author_id,
            author,
            reaction_counts: row.reaction_counts,
            comment_count: row.comment_count,
            attachments,
            created_at: row.created_at,
            client_token: None,
        }
    }

    pub fn with_client_token(mut self, token: Option<Uuid>) -> Self {
        self.client_token = token;
        self
    }

    /// Set the cached count for `kind` and keep `likes_count` in step
    pub fn set_reaction_count(&mut self, kind: &str, count: i64) {
        self.reaction_counts.set(kind, count);
        self.likes_count = self.reaction_counts.likes();
    }
}

pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_CONTENT_LENGTH: usize = 10_000;

impl CreatePostRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".to_string());
        }
        if self.title.chars().count() > MAX_TITLE_LENGTH {
            return Err(format!("title too long (max {} characters)", MAX_TITLE_LENGTH));
        }
        if self.content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(format!("content too long (max {} characters)", MAX_CONTENT_LENGTH));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(anonymous: bool) -> PostRow {
        let mut counts = ReactionCounts::default();
        counts.set("like", 4);
        PostRow {
            id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
            title: "Play the intro song".into(),
            content: "please".into(),
            color: None,
            is_anonymous: anonymous,
            author_id: Uuid::new_v4(),
            reaction_counts: counts,
            created_at: Utc::now(),
            comment_count: 2,
        }
    }

    #[test]
    fn test_anonymous_post_hides_author() {
        let author = AuthorInfo { id: Uuid::new_v4(), display_name: "fan".into(), avatar_url: None };
        let post = PostResponse::from_row(row(true), Some(&author), vec![]);
        assert!(post.author.is_none());
        assert!(post.author_id.is_none());
        assert_eq!(post.likes_count, 4);

        let post = PostResponse::from_row(row(false), Some(&author), vec![]);
        assert_eq!(post.author, Some(author));
    }

    #[test]
    fn test_validate_title() {
        let req = CreatePostRequest {
            title: "  ".into(),
            content: String::new(),
            color: None,
            is_anonymous: false,
            client_token: None,
        };
        assert!(req.validate().is_err());
    }
}

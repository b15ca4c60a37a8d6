use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered user (board owner, poster or commenter)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    /// Notification address, never exposed through public profiles
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Public identity attached to posts, comments and activity entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AuthorInfo {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl User {
    pub fn author_info(&self) -> AuthorInfo {
        AuthorInfo {
            id: self.id,
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Request to register a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// Registration result. The token is shown once and only its hash is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user: User,
    pub token: String,
}

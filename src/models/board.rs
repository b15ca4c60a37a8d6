use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A creator's request board
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Board {
    pub id: Uuid,
    /// URL-safe path segment (e.g., "lofi-requests")
    pub url_path: String,
    pub title: String,
    pub description: String,
    /// Creator bio shown in the board header
    pub bio: String,
    pub creator_name: String,
    /// Board accent color
    pub color: String,
    pub owner_id: Uuid,
    /// Where new-post notifications for the creator go
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    /// Palette offered to visitors when writing a request
    #[sqlx(json)]
    pub post_colors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Board {
    pub fn path(&self) -> String {
        format!("/{}", self.url_path)
    }

    /// Whether `color` may be used for a post on this board.
    /// An empty palette accepts anything.
    pub fn allows_color(&self, color: &str) -> bool {
        self.post_colors.is_empty() || self.post_colors.iter().any(|c| c.eq_ignore_ascii_case(color))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBoardRequest {
    pub url_path: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub creator_name: String,
    #[serde(default = "default_board_color")]
    pub color: String,
    pub owner_email: Option<String>,
    #[serde(default)]
    pub post_colors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBoardRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub bio: Option<String>,
    pub creator_name: Option<String>,
    pub color: Option<String>,
    pub owner_email: Option<String>,
    pub post_colors: Option<Vec<String>>,
}

fn default_board_color() -> String {
    "#ffffff".to_string()
}

/// Validate a board url path: 2-64 chars of lowercase ascii, digits, '-' or '_'
pub fn validate_url_path(path: &str) -> Result<(), String> {
    if path.len() < 2 || path.len() > 64 {
        return Err("url_path must be between 2 and 64 characters".to_string());
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err("url_path may only contain lowercase letters, digits, '-' and '_'".to_string());
    }
    Ok(())
}

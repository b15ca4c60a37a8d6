use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// What an attachment hangs off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentType {
    Post,
    Comment,
}

impl ParentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentType::Post => "post",
            ParentType::Comment => "comment",
        }
    }
}

impl fmt::Display for ParentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ParentType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "post" => Ok(ParentType::Post),
            "comment" => Ok(ParentType::Comment),
            other => Err(format!("unknown parent_type '{}'", other)),
        }
    }
}

/// A file attached to a post or comment. The blob itself lives in the file proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub parent_type: ParentType,
    pub parent_id: Uuid,
    /// Name of the blob as returned by `POST /upload`
    pub storage_path: String,
    /// Original filename provided by the user
    pub file_name: String,
    /// MIME type
    pub file_type: String,
    /// Size in bytes
    pub file_size: i64,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Row insert after a successful blob upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttachment {
    pub parent_type: ParentType,
    pub parent_id: Uuid,
    pub storage_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentQuery {
    pub parent_type: ParentType,
    pub parent_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAttachmentsRequest {
    pub ids: Vec<Uuid>,
}

/// Response of the file proxy upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub storage_path: String,
}

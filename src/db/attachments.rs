use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Attachment, NewAttachment, ParentType};

/// Attachment row joined with the post/board it belongs to, for event
/// scoping and permission checks. Scope columns are NULL for orphaned rows.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScopedAttachment {
    #[sqlx(flatten)]
    pub attachment: Attachment,
    pub scope_post_id: Option<Uuid>,
    pub scope_board_id: Option<Uuid>,
    pub post_author_id: Option<Uuid>,
    pub board_owner_id: Option<Uuid>,
}

impl ScopedAttachment {
    /// Uploader, author of the containing post, or board owner
    pub fn deletable_by(&self, user_id: Uuid) -> bool {
        self.attachment.author_id == user_id
            || self.post_author_id == Some(user_id)
            || self.board_owner_id == Some(user_id)
    }
}

const SCOPED_SELECT: &str = r#"
    SELECT a.*,
           p.id AS scope_post_id,
           p.board_id AS scope_board_id,
           p.author_id AS post_author_id,
           b.owner_id AS board_owner_id
    FROM attachments a
    LEFT JOIN comments c ON a.parent_type = 'comment' AND c.id = a.parent_id
    LEFT JOIN posts p ON p.id = CASE WHEN a.parent_type = 'post' THEN a.parent_id ELSE c.post_id END
    LEFT JOIN boards b ON b.id = p.board_id
"#;

/// (board_id, post_id, parent author) of an attachment parent
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct ParentScope {
    pub board_id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
}

impl super::Database {
    /// Resolve where an attachment parent lives
    pub async fn attachment_parent_scope(&self, parent_type: ParentType, parent_id: Uuid) -> Result<ParentScope> {
        let query = match parent_type {
            ParentType::Post => {
                "SELECT board_id, id AS post_id, author_id FROM posts WHERE id = $1"
            }
            ParentType::Comment => {
                r#"
                SELECT p.board_id, p.id AS post_id, c.author_id
                FROM comments c JOIN posts p ON p.id = c.post_id
                WHERE c.id = $1 AND NOT c.is_deleted
                "#
            }
        };
        sqlx::query_as::<_, ParentScope>(query)
            .bind(parent_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", parent_type)))
    }

    pub async fn insert_attachment(&self, author_id: Uuid, new: &NewAttachment) -> Result<Attachment> {
        let row = sqlx::query_as::<_, Attachment>(
            r#"
            INSERT INTO attachments (
                id, parent_type, parent_id, storage_path, file_name, file_type,
                file_size, author_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.parent_type.as_str())
        .bind(new.parent_id)
        .bind(&new.storage_path)
        .bind(&new.file_name)
        .bind(&new.file_type)
        .bind(new.file_size)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("attachments_storage_path_key") {
                    return AppError::Conflict(format!("File '{}' is already attached", new.storage_path));
                }
            }
            AppError::Database(e)
        })?;
        Ok(row)
    }

    pub async fn record_upload(&self, storage_path: &str, uploader_id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO uploads (storage_path, uploader_id) VALUES ($1, $2)")
            .bind(storage_path)
            .bind(uploader_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Who uploaded a blob, if it is still on record
    pub async fn upload_owner(&self, storage_path: &str) -> Result<Option<Uuid>> {
        let owner: Option<(Uuid,)> = sqlx::query_as("SELECT uploader_id FROM uploads WHERE storage_path = $1")
            .bind(storage_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner.map(|(id,)| id))
    }

    pub async fn forget_uploads(&self, paths: &[String]) -> Result<u64> {
        if paths.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM uploads WHERE storage_path = ANY($1)")
            .bind(paths)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_attachments(&self, parent_type: ParentType, parent_id: Uuid) -> Result<Vec<Attachment>> {
        let rows = sqlx::query_as::<_, Attachment>(
            r#"
            SELECT * FROM attachments
            WHERE parent_type = $1 AND parent_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(parent_type.as_str())
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Batch lookup keyed by parent id
    pub async fn attachments_for_parents(
        &self,
        parent_type: ParentType,
        parent_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Attachment>>> {
        if parent_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, Attachment>(
            r#"
            SELECT * FROM attachments
            WHERE parent_type = $1 AND parent_id = ANY($2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(parent_type.as_str())
        .bind(parent_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for row in rows {
            grouped.entry(row.parent_id).or_default().push(row);
        }
        Ok(grouped)
    }

    pub async fn scoped_attachments(&self, ids: &[Uuid]) -> Result<Vec<ScopedAttachment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ScopedAttachment>(&format!("{} WHERE a.id = ANY($1)", SCOPED_SELECT))
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Rows pointing at one blob (zero or one)
    pub async fn scoped_attachments_for_blob(&self, storage_path: &str) -> Result<Vec<ScopedAttachment>> {
        let rows = sqlx::query_as::<_, ScopedAttachment>(&format!("{} WHERE a.storage_path = $1", SCOPED_SELECT))
            .bind(storage_path)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn delete_attachment_rows(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM attachments WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Which of the given blob names are still referenced by a row
    pub async fn referenced_storage_paths(&self, paths: &[String]) -> Result<HashSet<String>> {
        if paths.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT storage_path FROM attachments WHERE storage_path = ANY($1)",
        )
        .bind(paths)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }
}

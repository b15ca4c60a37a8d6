use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Attachment, CommentResponse, CommentRow, CreateCommentRequest, ParentType};

impl super::Database {
    /// Create a comment or a reply. Replies must target a top-level comment
    /// of the same post; replies to replies are rejected.
    pub async fn create_comment(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        req: &CreateCommentRequest,
    ) -> Result<CommentRow> {
        if let Some(parent_id) = req.parent_comment_id {
            let parent = self.get_comment_row(parent_id).await.map_err(|e| match e {
                AppError::NotFound(_) => AppError::BadRequest("Parent comment does not exist".to_string()),
                other => other,
            })?;
            if parent.post_id != post_id {
                return Err(AppError::BadRequest(
                    "Parent comment belongs to a different post".to_string(),
                ));
            }
            if parent.parent_comment_id.is_some() {
                return Err(AppError::BadRequest(
                    "Cannot reply to a reply, must reply to a top-level comment".to_string(),
                ));
            }
        }

        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            INSERT INTO comments (
                id, post_id, parent_comment_id, content, author_id, is_anonymous,
                is_deleted, reaction_counts, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, '{}', NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(post_id)
        .bind(req.parent_comment_id)
        .bind(&req.content)
        .bind(author_id)
        .bind(req.is_anonymous)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_comment_row(&self, id: Uuid) -> Result<CommentRow> {
        sqlx::query_as::<_, CommentRow>("SELECT * FROM comments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
    }

    /// Oldest first
    pub async fn list_post_comments(&self, post_id: Uuid) -> Result<Vec<CommentRow>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            "SELECT * FROM comments WHERE post_id = $1 ORDER BY created_at ASC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Flag the comment deleted and drop its attachment rows. Replies stay.
    /// Returns the updated row and the removed attachments.
    pub async fn soft_delete_comment(&self, id: Uuid) -> Result<(CommentRow, Vec<Attachment>)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, CommentRow>(
            "UPDATE comments SET is_deleted = TRUE WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        let removed = sqlx::query_as::<_, Attachment>(
            "DELETE FROM attachments WHERE parent_type = 'comment' AND parent_id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row, removed))
    }

    pub async fn comment_responses(&self, rows: Vec<CommentRow>) -> Result<Vec<CommentResponse>> {
        self.comment_responses_for(rows, None).await
    }

    /// Responses as seen by `viewer`, marking the comments they wrote
    pub async fn comment_responses_for(
        &self,
        rows: Vec<CommentRow>,
        viewer: Option<Uuid>,
    ) -> Result<Vec<CommentResponse>> {
        let mut author_ids: Vec<Uuid> = rows.iter().map(|r| r.author_id).collect();
        author_ids.sort();
        author_ids.dedup();
        let authors = self.get_authors_by_ids(&author_ids).await?;

        let comment_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut attachments = self.attachments_for_parents(ParentType::Comment, &comment_ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let files = attachments.remove(&row.id).unwrap_or_default();
                let author = authors.get(&row.author_id);
                let is_mine = viewer == Some(row.author_id);
                let mut comment = CommentResponse::from_row(row, author, files);
                comment.is_mine = is_mine;
                comment
            })
            .collect())
    }

    pub async fn comment_response(&self, row: CommentRow) -> Result<CommentResponse> {
        self.comment_responses(vec![row])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("comment response missing")))
    }
}

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Attachment, CreatePostRequest, ParentType, PostResponse, PostRow};

const POST_COLUMNS: &str = r#"
    p.*,
    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id AND NOT c.is_deleted) AS comment_count
"#;

impl super::Database {
    pub async fn create_post(
        &self,
        board_id: Uuid,
        author_id: Uuid,
        req: &CreatePostRequest,
    ) -> Result<PostRow> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (
                id, board_id, title, content, color, is_anonymous, author_id,
                reaction_counts, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, '{}', NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(board_id)
        .bind(req.title.trim())
        .bind(&req.content)
        .bind(&req.color)
        .bind(req.is_anonymous)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_post_row(&self, id: Uuid) -> Result<PostRow> {
        sqlx::query_as::<_, PostRow>(&format!("SELECT {} FROM posts p WHERE p.id = $1", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
    }

    /// Newest first; clients re-sort locally
    pub async fn list_board_posts(&self, board_id: Uuid) -> Result<Vec<PostRow>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {} FROM posts p WHERE p.board_id = $1 ORDER BY p.created_at DESC",
            POST_COLUMNS
        ))
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete a post and every attachment row hanging off it or its comments.
    /// Comments, reactions and subscriptions go with the post via FK cascade.
    /// Returns the attachment rows that were still present.
    pub async fn delete_post(&self, id: Uuid) -> Result<Vec<Attachment>> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query_as::<_, Attachment>(
            r#"
            DELETE FROM attachments
            WHERE (parent_type = 'post' AND parent_id = $1)
               OR (parent_type = 'comment' AND parent_id IN (SELECT id FROM comments WHERE post_id = $1))
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Post not found".to_string()));
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Attach author identity and attachment rows (batched)
    pub async fn post_responses(&self, rows: Vec<PostRow>) -> Result<Vec<PostResponse>> {
        let mut author_ids: Vec<Uuid> = rows.iter().map(|r| r.author_id).collect();
        author_ids.sort();
        author_ids.dedup();
        let authors = self.get_authors_by_ids(&author_ids).await?;

        let post_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut attachments = self.attachments_for_parents(ParentType::Post, &post_ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let files = attachments.remove(&row.id).unwrap_or_default();
                let author = authors.get(&row.author_id);
                PostResponse::from_row(row, author, files)
            })
            .collect())
    }

    pub async fn post_response(&self, row: PostRow) -> Result<PostResponse> {
        self.post_responses(vec![row])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("post response missing")))
    }
}

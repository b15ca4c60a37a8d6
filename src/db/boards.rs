use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Board, CreateBoardRequest, UpdateBoardRequest};

impl super::Database {
    pub async fn create_board(&self, owner_id: Uuid, req: &CreateBoardRequest) -> Result<Board> {
        sqlx::query_as::<_, Board>(
            r#"
            INSERT INTO boards (
                id, url_path, title, description, bio, creator_name, color,
                owner_id, owner_email, post_colors, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.url_path)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.bio)
        .bind(&req.creator_name)
        .bind(&req.color)
        .bind(owner_id)
        .bind(&req.owner_email)
        .bind(sqlx::types::Json(&req.post_colors))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("boards_url_path_key") {
                    return AppError::Conflict(format!("Board '{}' already exists", req.url_path));
                }
            }
            AppError::Database(e)
        })
    }

    pub async fn get_board(&self, id: Uuid) -> Result<Board> {
        sqlx::query_as::<_, Board>("SELECT * FROM boards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Board not found".to_string()))
    }

    pub async fn get_board_by_path(&self, url_path: &str) -> Result<Board> {
        sqlx::query_as::<_, Board>("SELECT * FROM boards WHERE url_path = $1")
            .bind(url_path)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Board '{}' not found", url_path)))
    }

    pub async fn list_boards(&self) -> Result<Vec<Board>> {
        let boards = sqlx::query_as::<_, Board>("SELECT * FROM boards ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(boards)
    }

    /// Partial update; absent fields keep their value
    pub async fn update_board(&self, id: Uuid, req: &UpdateBoardRequest) -> Result<Board> {
        sqlx::query_as::<_, Board>(
            r#"
            UPDATE boards SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                bio = COALESCE($4, bio),
                creator_name = COALESCE($5, creator_name),
                color = COALESCE($6, color),
                owner_email = COALESCE($7, owner_email),
                post_colors = COALESCE($8, post_colors)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.bio)
        .bind(&req.creator_name)
        .bind(&req.color)
        .bind(&req.owner_email)
        .bind(req.post_colors.as_ref().map(sqlx::types::Json))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Board not found".to_string()))
    }
}

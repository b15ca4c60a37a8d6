use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::{generate_token, hash_token};
use crate::error::{AppError, Result};
use crate::models::{AuthorInfo, RegisterRequest, User};

impl super::Database {
    /// Register a user and issue their first token. Returns the plaintext token.
    pub async fn create_user(&self, req: &RegisterRequest) -> Result<(User, String)> {
        let token = generate_token();
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, display_name, email, avatar_url, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.display_name.trim())
        .bind(&req.email)
        .bind(&req.avatar_url)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO user_tokens (key_hash, user_id, created_at) VALUES ($1, $2, NOW())")
            .bind(hash_token(&token))
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((user, token))
    }

    /// Resolve a token hash to its user and record the use
    pub async fn validate_token(&self, key_hash: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE user_tokens SET last_used = NOW()
            FROM users u
            WHERE user_tokens.key_hash = $1 AND u.id = user_tokens.user_id
            RETURNING u.*
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))?;

        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Batch author lookup (avoids N+1 when building post/comment lists)
    pub async fn get_authors_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, AuthorInfo>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let authors = sqlx::query_as::<_, AuthorInfo>(
            "SELECT id, display_name, avatar_url FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(authors.into_iter().map(|a| (a.id, a)).collect())
    }
}

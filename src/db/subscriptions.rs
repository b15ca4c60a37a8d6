use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{SubscriberEmail, Subscription};

impl super::Database {
    /// Idempotent; returns the row either way
    pub async fn subscribe(&self, user_id: Uuid, post_id: Uuid) -> Result<(Subscription, bool)> {
        let inserted = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, post_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id, post_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_foreign_key_violation() {
                    return AppError::NotFound("Post not found".to_string());
                }
            }
            AppError::Database(e)
        })?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let existing = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND post_id = $2",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((existing, false))
    }

    /// Returns the removed row, if there was one
    pub async fn unsubscribe(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<Subscription>> {
        let removed = sqlx::query_as::<_, Subscription>(
            "DELETE FROM subscriptions WHERE user_id = $1 AND post_id = $2 RETURNING *",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(removed)
    }

    pub async fn is_subscribed(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = $1 AND post_id = $2)",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Subscribers of a post that have an email address
    pub async fn subscriber_emails(&self, post_id: Uuid) -> Result<Vec<SubscriberEmail>> {
        let rows = sqlx::query_as::<_, SubscriberEmail>(
            r#"
            SELECT u.id AS user_id, u.email
            FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.post_id = $1 AND u.email IS NOT NULL AND u.email <> ''
            ORDER BY s.created_at ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

//! Reaction toggles
//!
//! A toggle reads the caller's reaction row, deletes it or inserts it, and
//! moves the cached counter by one. All three steps run in one transaction
//! with the target row locked, and the counter is computed from its current
//! value inside the UPDATE, so concurrent toggles on the same target cannot
//! lose updates. The counter is clamped at zero.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CommentReaction, CommentRow, MyReactions, PostRow, Reaction, ToggleOutcome};

/// Toggle result with everything the handler needs to publish change events
#[derive(Debug, Clone)]
pub struct ToggleResult<R, T> {
    pub outcome: ToggleOutcome,
    /// The inserted row, or the deleted one when `outcome.liked` is false
    pub reaction: R,
    /// Target row after the counter update
    pub target: T,
}

impl super::Database {
    pub async fn toggle_post_reaction(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        kind: &str,
    ) -> Result<ToggleResult<Reaction, PostRow>> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(AppError::NotFound("Post not found".to_string()));
        }

        let existing = sqlx::query_as::<_, Reaction>(
            r#"
            DELETE FROM reactions
            WHERE post_id = $1 AND user_id = $2 AND reaction_type = $3
            RETURNING *
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(kind)
        .fetch_optional(&mut *tx)
        .await?;

        let (reaction, delta) = match existing {
            Some(row) => (row, -1i64),
            None => {
                let row = sqlx::query_as::<_, Reaction>(
                    r#"
                    INSERT INTO reactions (post_id, user_id, reaction_type, created_at)
                    VALUES ($1, $2, $3, NOW())
                    RETURNING *
                    "#,
                )
                .bind(post_id)
                .bind(user_id)
                .bind(kind)
                .fetch_one(&mut *tx)
                .await?;
                (row, 1i64)
            }
        };

        let target = sqlx::query_as::<_, PostRow>(
            r#"
            UPDATE posts
            SET reaction_counts = jsonb_set(
                reaction_counts,
                ARRAY[$2::text],
                to_jsonb(GREATEST(COALESCE((reaction_counts ->> $2)::bigint, 0) + $3, 0))
            )
            WHERE id = $1
            RETURNING posts.*,
                (SELECT COUNT(*) FROM comments c WHERE c.post_id = posts.id AND NOT c.is_deleted) AS comment_count
            "#,
        )
        .bind(post_id)
        .bind(kind)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ToggleResult {
            outcome: ToggleOutcome { liked: delta > 0, count: target.reaction_counts.get(kind) },
            reaction,
            target,
        })
    }

    pub async fn toggle_comment_reaction(
        &self,
        comment_id: Uuid,
        user_id: Uuid,
        kind: &str,
    ) -> Result<ToggleResult<CommentReaction, CommentRow>> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<(bool,)> =
            sqlx::query_as("SELECT is_deleted FROM comments WHERE id = $1 FOR UPDATE")
                .bind(comment_id)
                .fetch_optional(&mut *tx)
                .await?;
        match locked {
            None => return Err(AppError::NotFound("Comment not found".to_string())),
            Some((true,)) => {
                return Err(AppError::BadRequest("Cannot react to a deleted comment".to_string()))
            }
            Some((false,)) => {}
        }

        let existing = sqlx::query_as::<_, CommentReaction>(
            r#"
            DELETE FROM comment_reactions
            WHERE comment_id = $1 AND user_id = $2 AND reaction_type = $3
            RETURNING *
            "#,
        )
        .bind(comment_id)
        .bind(user_id)
        .bind(kind)
        .fetch_optional(&mut *tx)
        .await?;

        let (reaction, delta) = match existing {
            Some(row) => (row, -1i64),
            None => {
                let row = sqlx::query_as::<_, CommentReaction>(
                    r#"
                    INSERT INTO comment_reactions (comment_id, user_id, reaction_type, created_at)
                    VALUES ($1, $2, $3, NOW())
                    RETURNING *
                    "#,
                )
                .bind(comment_id)
                .bind(user_id)
                .bind(kind)
                .fetch_one(&mut *tx)
                .await?;
                (row, 1i64)
            }
        };

        let target = sqlx::query_as::<_, CommentRow>(
            r#"
            UPDATE comments
            SET reaction_counts = jsonb_set(
                reaction_counts,
                ARRAY[$2::text],
                to_jsonb(GREATEST(COALESCE((reaction_counts ->> $2)::bigint, 0) + $3, 0))
            )
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(comment_id)
        .bind(kind)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ToggleResult {
            outcome: ToggleOutcome { liked: delta > 0, count: target.reaction_counts.get(kind) },
            reaction,
            target,
        })
    }

    /// The caller's reactions on every post of a board
    pub async fn my_board_reactions(&self, board_id: Uuid, user_id: Uuid) -> Result<MyReactions> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT r.post_id, r.reaction_type
            FROM reactions r
            JOIN posts p ON p.id = r.post_id
            WHERE p.board_id = $1 AND r.user_id = $2
            "#,
        )
        .bind(board_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(group_reactions(rows))
    }

    /// The caller's reactions on every comment of a post
    pub async fn my_comment_reactions(&self, post_id: Uuid, user_id: Uuid) -> Result<MyReactions> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT cr.comment_id, cr.reaction_type
            FROM comment_reactions cr
            JOIN comments c ON c.id = cr.comment_id
            WHERE c.post_id = $1 AND cr.user_id = $2
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(group_reactions(rows))
    }
}

fn group_reactions(rows: Vec<(Uuid, String)>) -> MyReactions {
    let mut targets: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
    for (target, kind) in rows {
        targets.entry(target).or_default().push(kind);
    }
    MyReactions { targets }
}

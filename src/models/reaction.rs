use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The only reaction kind the UI offers today
pub const LIKE: &str = "like";

/// Denormalized per-kind reaction counters stored as JSONB on posts and comments.
///
/// This is a cache of the reaction rows; it is never allowed to go negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionCounts(pub BTreeMap<String, i64>);

impl ReactionCounts {
    pub fn get(&self, kind: &str) -> i64 {
        self.0.get(kind).copied().unwrap_or(0).max(0)
    }

    pub fn likes(&self) -> i64 {
        self.get(LIKE)
    }

    pub fn set(&mut self, kind: &str, count: i64) {
        self.0.insert(kind.to_string(), count.max(0));
    }

    /// Apply a +1/-1 style delta, clamping at zero. Returns the new count.
    pub fn adjust(&mut self, kind: &str, delta: i64) -> i64 {
        let next = (self.get(kind) + delta).max(0);
        self.0.insert(kind.to_string(), next);
        next
    }
}

/// A post-level reaction row. Existence of the row is the "reacted" state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Reaction {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub reaction_type: String,
    pub created_at: DateTime<Utc>,
}

/// A comment-level reaction row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CommentReaction {
    pub comment_id: Uuid,
    pub user_id: Uuid,
    pub reaction_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub reaction_type: Option<String>,
}

impl ToggleRequest {
    pub fn kind(&self) -> &str {
        self.reaction_type.as_deref().unwrap_or(LIKE)
    }
}

/// Authoritative state after a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    /// Whether the caller's reaction row exists after the toggle
    pub liked: bool,
    /// Cached counter for the toggled kind after the toggle
    pub count: i64,
}

/// Which reaction kinds the caller currently holds, keyed by target id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MyReactions {
    pub targets: BTreeMap<Uuid, Vec<String>>,
}

impl MyReactions {
    pub fn has(&self, target: Uuid, kind: &str) -> bool {
        self.targets
            .get(&target)
            .map(|kinds| kinds.iter().any(|k| k == kind))
            .unwrap_or(false)
    }
}

/// Validate a reaction kind: short lowercase identifier
pub fn validate_reaction_type(kind: &str) -> Result<(), String> {
    if kind.is_empty() || kind.len() > 32 {
        return Err("reaction_type must be 1-32 characters".to_string());
    }
    if !kind.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        return Err("reaction_type may only contain lowercase letters and '_'".to_string());
    }
    Ok(())
}

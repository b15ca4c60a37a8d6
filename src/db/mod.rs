mod attachments;
mod boards;
mod comments;
mod posts;
mod reactions;
mod subscriptions;
mod users;

pub use attachments::{ParentScope, ScopedAttachment};
pub use reactions::ToggleResult;

use sqlx::PgPool;

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

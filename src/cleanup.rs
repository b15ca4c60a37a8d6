//! Background cleanup
//!
//! Uploads and attachment rows are written in two steps, and deletes remove
//! blobs and rows separately, so blobs can be left without a row. This task
//! periodically deletes blobs that no attachment row references once they
//! are older than the configured grace period.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::storage::BlobStore;

/// Start the orphan sweep
pub fn start_cleanup_tasks(db: Database, blobs: Arc<dyn BlobStore>, config: Arc<Config>) {
    let cleanup_interval = Duration::from_secs(config.uploads.cleanup_interval_secs.max(1));
    let grace = Duration::from_secs(config.uploads.orphan_grace_secs);

    tokio::spawn(async move {
        let mut ticker = interval(cleanup_interval);

        loop {
            ticker.tick().await;

            match sweep_orphaned_blobs(&db, blobs.as_ref(), grace).await {
                Ok(count) if count > 0 => info!("Removed {} orphaned blobs", count),
                Ok(_) => {}
                Err(e) => error!("Cleanup task error: {}", e),
            }
        }
    });
}

/// Delete unreferenced blobs older than `grace`. Returns how many were removed.
pub async fn sweep_orphaned_blobs(
    db: &Database,
    blobs: &dyn BlobStore,
    grace: Duration,
) -> anyhow::Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::from_std(grace)?;
    let candidates: Vec<String> = blobs
        .list()
        .await?
        .into_iter()
        .filter(|b| b.modified < cutoff)
        .map(|b| b.name)
        .collect();

    if candidates.is_empty() {
        return Ok(0);
    }

    let referenced = db.referenced_storage_paths(&candidates).await?;
    let mut removed = Vec::new();
    for name in candidates.into_iter().filter(|n| !referenced.contains(n)) {
        match blobs.delete(&name).await {
            Ok(()) => removed.push(name),
            Err(e) => warn!("Failed to delete orphaned blob {}: {}", name, e),
        }
    }
    db.forget_uploads(&removed).await?;

    Ok(removed.len())
}

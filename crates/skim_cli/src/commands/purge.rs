//! Purge command implementation.

use skim_engine::{ConflictReconciler, HttpDatabase};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Deletes revisions of `id` from `sink` until none is left.
pub async fn run(
    sink: &str,
    id: &str,
    max_rounds: u32,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(sink, id, max_rounds, "purging document");
    let db = HttpDatabase::new(sink, timeout)?;
    let reconciler = ConflictReconciler::new(Arc::new(db), max_rounds);

    let deleted = reconciler.purge(id).await?;
    println!("Purged {id}: {deleted} revision(s) deleted");
    Ok(())
}

//! Checkpoint command implementation.

use skim_engine::{CheckpointStore, SkimError};
use skim_protocol::Sequence;
use std::path::Path;
use tracing::warn;

/// Prints the persisted sequence.
pub async fn show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let sequence = CheckpointStore::new(path).load().await?;
    println!("{sequence}");
    Ok(())
}

/// Replaces the persisted sequence.
///
/// A corrupt file is overwritten.
pub async fn set(path: &Path, sequence: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = CheckpointStore::new(path);
    let previous = match store.load().await {
        Ok(previous) => previous.to_string(),
        Err(SkimError::CorruptCheckpoint { content, .. }) => {
            warn!(path = %path.display(), %content, "replacing corrupt checkpoint");
            "<corrupt>".to_string()
        }
        Err(e) => return Err(e.into()),
    };
    let sequence = Sequence::new(sequence);
    store.save(sequence).await?;
    println!("{previous} -> {sequence}");
    Ok(())
}

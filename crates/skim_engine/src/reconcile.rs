//! Removal of deleted documents from a split sink.
//!
//! Replicated writes can leave a sink with several conflicting leaves for one
//! document. Deleting the winner exposes the next one, so the purge repeats
//! HEAD and DELETE until the document is gone.

use crate::database::CouchDatabase;
use crate::error::{SkimError, SkimResult};
use std::sync::Arc;
use tracing::debug;

/// Purges every revision of a document from the sink.
#[derive(Clone)]
pub struct ConflictReconciler {
    sink: Arc<dyn CouchDatabase>,
    max_rounds: u32,
}

impl ConflictReconciler {
    /// Creates a reconciler for `sink`.
    pub fn new(sink: Arc<dyn CouchDatabase>, max_rounds: u32) -> Self {
        Self { sink, max_rounds }
    }

    /// Deletes revisions of `id` until a HEAD reports it missing.
    ///
    /// Returns the number of revisions deleted. A DELETE answering 404 is
    /// not an error; the next HEAD decides.
    ///
    /// # Errors
    ///
    /// Any other database error stops the loop. Exceeding the round limit is
    /// [`SkimError::PurgeLimitExceeded`].
    pub async fn purge(&self, id: &str) -> SkimResult<u32> {
        let mut deleted = 0;
        for round in 0..self.max_rounds {
            let Some(rev) = self.sink.head_revision(id).await? else {
                debug!(id, deleted, "purge complete");
                return Ok(deleted);
            };
            debug!(id, rev = %rev, round, "purging revision");
            if self.sink.delete_revision(id, &rev).await? {
                deleted += 1;
            }
        }
        Err(SkimError::PurgeLimitExceeded {
            id: id.to_string(),
            rounds: self.max_rounds,
        })
    }
}

impl std::fmt::Debug for ConflictReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictReconciler")
            .field("sink", &self.sink.url())
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{FetchOptions, WriteMode};
    use crate::memory::MemoryDatabase;
    use skim_protocol::Document;

    /// A sink holding two conflicting leaves of `foo`.
    async fn conflicted_sink() -> Arc<MemoryDatabase> {
        let source = MemoryDatabase::new("mem://source");
        let sink = Arc::new(MemoryDatabase::new("mem://sink"));

        source.publish(Document::new("foo"), vec![]);
        let first = source.get_document("foo", FetchOptions::package()).await.unwrap().unwrap();
        sink.put_document(&first, WriteMode::Replicate).await.unwrap();

        sink.publish(Document::new("foo"), vec![]);
        source.publish(Document::new("foo"), vec![]);
        let second = source.get_document("foo", FetchOptions::package()).await.unwrap().unwrap();
        sink.put_document(&second, WriteMode::Replicate).await.unwrap();

        assert_eq!(sink.leaf_revisions("foo").len(), 2);
        sink
    }

    #[tokio::test]
    async fn purges_all_leaves() {
        let sink = conflicted_sink().await;
        let reconciler = ConflictReconciler::new(sink.clone(), 10);

        assert_eq!(reconciler.purge("foo").await.unwrap(), 2);
        assert!(sink.leaf_revisions("foo").is_empty());
        assert_eq!(sink.requests().heads, 3);
    }

    #[tokio::test]
    async fn missing_document_is_done() {
        let sink = Arc::new(MemoryDatabase::new("mem://sink"));
        let reconciler = ConflictReconciler::new(sink.clone(), 10);
        assert_eq!(reconciler.purge("nothing").await.unwrap(), 0);
        assert_eq!(sink.requests().deletes, 0);
    }

    #[tokio::test]
    async fn round_limit() {
        let sink = conflicted_sink().await;
        let reconciler = ConflictReconciler::new(sink.clone(), 1);

        let err = reconciler.purge("foo").await.unwrap_err();
        assert!(matches!(err, SkimError::PurgeLimitExceeded { rounds: 1, .. }));
        assert_eq!(sink.leaf_revisions("foo").len(), 1);
    }
}

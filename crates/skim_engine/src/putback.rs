//! Writing skimmed documents back.
//!
//! In place, the skimmed document is a new edit on top of the fetched
//! revision; losing a race against a publish is harmless because the newer
//! revision produces its own change and is skimmed then. Into a separate
//! sink it is a replicated write that keeps the source revision history, and
//! a conflict there is a real error.

use crate::database::{Endpoints, WriteMode};
use crate::error::SkimResult;
use skim_protocol::Document;
use tracing::debug;

/// What a putback did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutbackOutcome {
    /// The document was stored with this revision.
    Written(String),
    /// An in-place write lost against a concurrent edit.
    Conflicted,
}

/// Writes skimmed documents to the sink.
#[derive(Debug, Clone)]
pub struct PutbackWriter {
    endpoints: Endpoints,
}

impl PutbackWriter {
    /// Creates a writer for `endpoints`.
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    /// Stores `doc` without its attachments.
    pub async fn write(&self, mut doc: Document) -> SkimResult<PutbackOutcome> {
        doc.attachments = None;

        let mode = if self.endpoints.is_shared() {
            doc.revisions = None;
            WriteMode::NewEdit
        } else {
            WriteMode::Replicate
        };

        match self.endpoints.sink().put_document(&doc, mode).await {
            Ok(rev) => {
                debug!(id = %doc.id, rev = %rev, ?mode, "put back");
                Ok(PutbackOutcome::Written(rev))
            }
            Err(e) if e.is_conflict() && mode == WriteMode::NewEdit => {
                debug!(id = %doc.id, "putback conflict ignored");
                Ok(PutbackOutcome::Conflicted)
            }
            Err(e) => Err(e),
        }
    }
}

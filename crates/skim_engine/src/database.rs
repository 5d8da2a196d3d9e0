//! Document database abstraction.
//!
//! The skimmer needs five operations from a CouchDB-style database. They are
//! behind a trait so the pipeline can run against [`HttpDatabase`] in
//! production and [`MemoryDatabase`] in tests.
//!
//! [`HttpDatabase`]: crate::HttpDatabase
//! [`MemoryDatabase`]: crate::MemoryDatabase

use crate::error::SkimResult;
use async_trait::async_trait;
use bytes::Bytes;
use skim_protocol::Document;
use std::fmt;
use std::sync::Arc;

/// Query options for fetching a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchOptions {
    /// Include `_revisions`.
    pub revs: bool,
    /// Include attachment encoding info.
    pub att_encoding_info: bool,
}

impl FetchOptions {
    /// Options for package documents: revisions and attachment encoding.
    pub const fn package() -> Self {
        Self {
            revs: true,
            att_encoding_info: true,
        }
    }

    /// Options for design documents: revisions only.
    pub const fn design() -> Self {
        Self {
            revs: true,
            att_encoding_info: false,
        }
    }

    /// Query string pairs for these options.
    pub fn query(&self) -> Vec<(&'static str, &'static str)> {
        let mut query = Vec::new();
        if self.att_encoding_info {
            query.push(("att_encoding_info", "true"));
        }
        if self.revs {
            query.push(("revs", "true"));
        }
        query
    }
}

/// How a document is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// A normal edit on top of `_rev`; a stale `_rev` is a conflict.
    NewEdit,
    /// Replication (`new_edits=false`): the revision and its history are
    /// stored as given.
    Replicate,
}

/// The database operations the skimmer relies on.
#[async_trait]
pub trait CouchDatabase: Send + Sync {
    /// Database URL, for logs.
    fn url(&self) -> &str;

    /// Fetches a document; `None` if it does not exist.
    async fn get_document(&self, id: &str, options: FetchOptions) -> SkimResult<Option<Document>>;

    /// Fetches the raw content of an attachment.
    async fn get_attachment(&self, id: &str, filename: &str) -> SkimResult<Bytes>;

    /// Returns the current revision of a document; `None` if it does not
    /// exist.
    async fn head_revision(&self, id: &str) -> SkimResult<Option<String>>;

    /// Writes a document and returns the stored revision.
    ///
    /// # Errors
    ///
    /// Returns [`SkimError::Conflict`](crate::SkimError::Conflict) on 409.
    async fn put_document(&self, doc: &Document, mode: WriteMode) -> SkimResult<String>;

    /// Deletes one revision; `false` if it was already gone.
    async fn delete_revision(&self, id: &str, rev: &str) -> SkimResult<bool>;
}

/// Where documents are read from and written to.
#[derive(Clone)]
pub enum Endpoints {
    /// Documents are skimmed in place.
    Shared(Arc<dyn CouchDatabase>),
    /// Documents are read from `source` and replicated into `sink`.
    Split {
        /// Database the feed belongs to.
        source: Arc<dyn CouchDatabase>,
        /// Database receiving skimmed documents.
        sink: Arc<dyn CouchDatabase>,
    },
}

impl Endpoints {
    /// The database documents and attachments are read from.
    pub fn source(&self) -> &Arc<dyn CouchDatabase> {
        match self {
            Endpoints::Shared(db) => db,
            Endpoints::Split { source, .. } => source,
        }
    }

    /// The database skimmed documents are written to.
    pub fn sink(&self) -> &Arc<dyn CouchDatabase> {
        match self {
            Endpoints::Shared(db) => db,
            Endpoints::Split { sink, .. } => sink,
        }
    }

    /// Returns true if source and sink are the same database.
    pub fn is_shared(&self) -> bool {
        matches!(self, Endpoints::Shared(_))
    }
}

impl fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoints::Shared(db) => f.debug_tuple("Shared").field(&db.url()).finish(),
            Endpoints::Split { source, sink } => f
                .debug_struct("Split")
                .field("source", &source.url())
                .field("sink", &sink.url())
                .finish(),
        }
    }
}

//! Change-feed records.

use crate::document::Document;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Position in the source database's change stream.
///
/// Sequences are non-decreasing within one stream session. Zero means
/// "from the beginning".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(pub u64);

impl Sequence {
    /// The start of the stream.
    pub const ZERO: Sequence = Sequence(0);

    /// Creates a new sequence.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Sequence {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Sequence)
    }
}

impl From<u64> for Sequence {
    fn from(seq: u64) -> Self {
        Self(seq)
    }
}

/// A single record from the change feed.
///
/// Only `sequence`, `id` and `deleted` are relied upon; when the feed
/// includes the document body it is carried along but the dispatcher always
/// re-fetches the full document with attachment metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Position of this change in the stream.
    #[serde(rename = "seq")]
    pub sequence: Sequence,
    /// Document id. Empty for feed heartbeats/markers.
    #[serde(default)]
    pub id: String,
    /// Whether the document was deleted.
    #[serde(default)]
    pub deleted: bool,
    /// Document body, if the feed included it.
    #[serde(rename = "doc", default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl ChangeEvent {
    /// Creates an update event.
    pub fn update(sequence: impl Into<Sequence>, id: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            id: id.into(),
            deleted: false,
            document: None,
        }
    }

    /// Creates a deletion event.
    pub fn deletion(sequence: impl Into<Sequence>, id: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            id: id.into(),
            deleted: true,
            document: None,
        }
    }

    /// Attaches a document body.
    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    /// Returns true if the id names a design document.
    pub fn is_design_document(&self) -> bool {
        self.id.starts_with("_design/")
    }

    /// Returns true if the id survives URI-component encoding unchanged.
    ///
    /// Ids that need escaping cannot be round-tripped through every storage
    /// target, so they are skipped.
    pub fn has_url_safe_id(&self) -> bool {
        self.id.chars().all(is_unreserved)
    }
}

/// Characters left untouched by `encodeURIComponent`.
fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')')
}

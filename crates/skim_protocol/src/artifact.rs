//! Mirror artifacts derived from a skimmed document.

use crate::document::Document;
use serde::Serialize;

/// Filename of the serialized document inside a package directory.
pub const DOC_JSON: &str = "doc.json";

/// What an artifact carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The serialized skimmed document.
    Document,
    /// A binary attachment fetched from the source.
    Attachment {
        /// Attachment filename.
        filename: String,
    },
}

/// A file that must be delivered to every storage target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Target-relative path.
    pub path: String,
    /// Content kind.
    #[serde(flatten)]
    pub kind: ArtifactKind,
    /// Expected content length, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_length: Option<u64>,
}

impl Artifact {
    /// Returns true for `doc.json`.
    pub fn is_document(&self) -> bool {
        matches!(self.kind, ArtifactKind::Document)
    }

    /// Returns the attachment filename for binary artifacts.
    pub fn attachment_name(&self) -> Option<&str> {
        match &self.kind {
            ArtifactKind::Document => None,
            ArtifactKind::Attachment { filename } => Some(filename),
        }
    }
}

/// Lists the artifacts for a skimmed document.
///
/// `doc.json` always comes first, followed by every attachment that is not
/// marked as already delivered.
pub fn plan_artifacts(doc: &Document) -> Vec<Artifact> {
    let package = doc.package_name();
    let mut artifacts = vec![Artifact {
        path: format!("{package}/{DOC_JSON}"),
        kind: ArtifactKind::Document,
        expected_length: None,
    }];

    artifacts.extend(doc.pending_attachments().map(|(filename, meta)| Artifact {
        path: format!("{package}/_attachments/{filename}"),
        kind: ArtifactKind::Attachment {
            filename: filename.clone(),
        },
        expected_length: meta.expected_length(),
    }));

    artifacts
}

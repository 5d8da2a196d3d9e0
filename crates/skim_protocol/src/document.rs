//! Registry documents.
//!
//! Only the fields the skimmer reasons about are typed; everything else is
//! kept in `extra` maps so a document survives a fetch/transform/put cycle
//! without losing data.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::transform::tarball_basename;

/// A registry document as stored in the source database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Current revision.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Package name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Published versions keyed by version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<BTreeMap<String, VersionInfo>>,
    /// Attachment metadata keyed by filename.
    #[serde(rename = "_attachments", default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<BTreeMap<String, AttachmentMeta>>,
    /// Explicit revision history, present when fetched with `revs=true`.
    #[serde(rename = "_revisions", default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<Value>,
    /// Top-level readme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    /// All remaining fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Creates an empty document with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            name: None,
            versions: None,
            attachments: None,
            revisions: None,
            readme: None,
            extra: Map::new(),
        }
    }

    /// Decodes a document from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the document as JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Encodes the document as a single JSON line (used for `doc.json`).
    pub fn to_json_line(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = self.to_json()?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Returns the package name, falling back to the document id.
    pub fn package_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Returns true if this is a design document.
    pub fn is_design(&self) -> bool {
        self.id.starts_with("_design/")
    }

    /// Returns the version tagged `latest`, if any.
    pub fn latest_version(&self) -> Option<&str> {
        self.extra
            .get("dist-tags")
            .and_then(|tags| tags.get("latest"))
            .and_then(Value::as_str)
    }

    /// Returns the tarball filenames referenced by the published versions.
    pub fn tarball_names(&self) -> BTreeSet<String> {
        self.versions
            .iter()
            .flat_map(|versions| versions.values())
            .filter_map(VersionInfo::tarball)
            .filter_map(tarball_basename)
            .collect()
    }

    /// Returns the attachments that still have to be transferred.
    pub fn pending_attachments(&self) -> impl Iterator<Item = (&String, &AttachmentMeta)> {
        self.attachments
            .iter()
            .flat_map(|attachments| attachments.iter())
            .filter(|(_, meta)| !meta.skip)
    }

    /// Returns true if the document carries any attachment entries.
    pub fn has_attachments(&self) -> bool {
        self.attachments.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Metadata for one published version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Distribution info (tarball location, checksums).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Dist>,
    /// Version-specific readme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    /// All remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionInfo {
    /// Creates version info pointing at a tarball URL.
    pub fn with_tarball(tarball: impl Into<String>) -> Self {
        Self {
            dist: Some(Dist {
                tarball: Some(tarball.into()),
                extra: Map::new(),
            }),
            ..Self::default()
        }
    }

    /// Returns the tarball URL.
    pub fn tarball(&self) -> Option<&str> {
        self.dist.as_ref().and_then(|d| d.tarball.as_deref())
    }
}

/// The `dist` block of a version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    /// Tarball URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    /// All remaining fields (shasum, integrity, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Attachment metadata as returned with `att_encoding_info=true`.
///
/// `skip` is not a database field: it marks an attachment that has already
/// been mirrored and must never be fetched from the source again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Length of the decoded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// Storage encoding (e.g. `gzip`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Length as stored, when encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_length: Option<u64>,
    /// Content digest reported by the database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Whether this is a stub (metadata only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub: Option<bool>,
    /// Revision position at which the attachment was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revpos: Option<u64>,
    /// Already synchronized; do not fetch.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip: bool,
    /// All remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttachmentMeta {
    /// Creates a skip marker.
    pub fn skipped() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    /// Creates stub metadata for stored content.
    pub fn stub(content_type: impl Into<String>, length: u64) -> Self {
        Self {
            content_type: Some(content_type.into()),
            length: Some(length),
            stub: Some(true),
            ..Self::default()
        }
    }

    /// Returns true if the content is stored gzip-encoded.
    pub fn is_gzip(&self) -> bool {
        self.encoding.as_deref() == Some("gzip")
    }

    /// Length the mirrored file is expected to have.
    ///
    /// Unknown for gzip-encoded attachments: the reported digest and length
    /// describe the encoded form, not what the attachment endpoint serves.
    pub fn expected_length(&self) -> Option<u64> {
        if self.is_gzip() {
            None
        } else {
            self.length
        }
    }
}

//! # Skim Protocol
//!
//! Registry document model and the skimming transform.
//!
//! This crate provides:
//! - `ChangeEvent` and `Sequence` for change-feed records
//! - `Document`, `VersionInfo` and `AttachmentMeta` for registry documents
//! - `TransformPolicy` and the default `SkimPolicy`
//! - Artifact planning (which files a skimmed document mirrors)
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod artifact;
mod change;
mod document;
mod error;
mod transform;

pub use artifact::{plan_artifacts, Artifact, ArtifactKind, DOC_JSON};
pub use change::{ChangeEvent, Sequence};
pub use document::{AttachmentMeta, Dist, Document, VersionInfo};
pub use error::{ProtocolError, ProtocolResult};
pub use transform::{
    tarball_basename, SkimPolicy, TransformOutcome, TransformPolicy, DEFAULT_MAX_README_BYTES,
};

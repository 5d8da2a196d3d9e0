//! Storage target trait definition.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Metadata for a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// A destination for mirrored content.
///
/// # Invariants
///
/// - `write` replaces the whole file; readers never see a partial write
/// - `remove_all` is recursive and succeeds when nothing exists
/// - paths are relative and use `/` separators
#[async_trait]
pub trait StorageTarget: Send + Sync {
    /// Human-readable name used in logs and fan-out errors.
    fn name(&self) -> &str;

    /// Returns metadata for `path`, or `None` if nothing is stored there.
    async fn stat(&self, path: &str) -> StorageResult<Option<EntryStat>>;

    /// Stores `data` at `path`, creating parent directories as needed.
    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()>;

    /// Removes `prefix` and everything below it.
    async fn remove_all(&self, prefix: &str) -> StorageResult<()>;

    /// Returns the SHA-256 hex digest of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist.
    async fn digest(&self, path: &str) -> StorageResult<String>;
}

/// Validates and normalizes a target-relative path.
///
/// Leading slashes and `.` segments are dropped; `..` segments and empty
/// paths are rejected.
pub fn normalize_path(path: &str) -> StorageResult<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(StorageError::InvalidPath(path.to_string())),
            s if s.contains('\\') || s.contains('\0') => {
                return Err(StorageError::InvalidPath(path.to_string()))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

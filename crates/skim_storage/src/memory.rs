//! In-memory storage target for testing.

use crate::error::{StorageError, StorageResult};
use crate::target::{normalize_path, sha256_hex, EntryStat, StorageTarget};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An in-memory storage target.
///
/// Files live in a sorted map, so directories are implied by path prefixes.
/// Writes can be made to fail for paths matching a substring, which is how
/// tests exercise partial fan-out failures.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    name: String,
    files: RwLock<BTreeMap<String, Bytes>>,
    fail_writes: RwLock<Option<String>>,
    writes: AtomicUsize,
}

impl MemoryTarget {
    /// Creates an empty target.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Makes every write whose path contains `pattern` fail.
    pub fn fail_writes_matching(&self, pattern: impl Into<String>) {
        *self.fail_writes.write() = Some(pattern.into());
    }

    /// Stops injecting write failures.
    pub fn clear_failures(&self) {
        *self.fail_writes.write() = None;
    }

    /// Returns the content stored at `path`.
    pub fn get(&self, path: &str) -> Option<Bytes> {
        let path = normalize_path(path).ok()?;
        self.files.read().get(&path).cloned()
    }

    /// Returns all stored paths in order.
    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
impl StorageTarget for MemoryTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<EntryStat>> {
        let path = normalize_path(path)?;
        let files = self.files.read();

        if let Some(data) = files.get(&path) {
            return Ok(Some(EntryStat {
                size: data.len() as u64,
                is_dir: false,
            }));
        }
        let is_dir = files.keys().any(|key| is_under(key, &path));
        Ok(is_dir.then_some(EntryStat {
            size: 0,
            is_dir: true,
        }))
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let path = normalize_path(path)?;
        if let Some(pattern) = self.fail_writes.read().as_deref() {
            if path.contains(pattern) {
                return Err(StorageError::Rejected {
                    target: self.name.clone(),
                    reason: format!("injected failure for {path}"),
                });
            }
        }

        self.files.write().insert(path, data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_all(&self, prefix: &str) -> StorageResult<()> {
        let prefix = normalize_path(prefix)?;
        self.files.write().retain(|key, _| !is_under(key, &prefix));
        Ok(())
    }

    async fn digest(&self, path: &str) -> StorageResult<String> {
        let data = self
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(sha256_hex(&data))
    }
}

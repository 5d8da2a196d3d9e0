//! Fan-out over several storage targets.

use crate::error::{StorageError, StorageResult, TargetFailure};
use crate::target::{EntryStat, StorageTarget};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

/// A set of targets that all receive every write and removal.
///
/// Operations run concurrently. A partial failure is reported as
/// [`StorageError::Fanout`] after every target has finished, so the
/// healthy targets are never left half-way.
#[derive(Clone, Default)]
pub struct MultiTarget {
    targets: Vec<Arc<dyn StorageTarget>>,
}

impl MultiTarget {
    /// Creates a fan-out over `targets`.
    pub fn new(targets: Vec<Arc<dyn StorageTarget>>) -> Self {
        Self { targets }
    }

    /// Adds a target.
    #[must_use]
    pub fn with_target(mut self, target: Arc<dyn StorageTarget>) -> Self {
        self.targets.push(target);
        self
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if there are no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns the targets.
    pub fn targets(&self) -> &[Arc<dyn StorageTarget>] {
        &self.targets
    }

    /// Returns the subset of targets that do not already hold `path` with
    /// `expected_len` bytes.
    ///
    /// A target whose stat fails is kept, so the write is attempted and the
    /// real error surfaces there.
    pub async fn select_missing(&self, path: &str, expected_len: u64) -> MultiTarget {
        let stats = join_all(self.targets.iter().map(|t| t.stat(path))).await;
        let targets = self
            .targets
            .iter()
            .zip(stats)
            .filter(|(target, stat)| match stat {
                Ok(Some(EntryStat { size, is_dir: false })) if *size == expected_len => {
                    debug!(storage = target.name(), path, "already present");
                    false
                }
                _ => true,
            })
            .map(|(target, _)| Arc::clone(target))
            .collect();
        MultiTarget { targets }
    }

    fn collect(&self, results: Vec<StorageResult<()>>) -> StorageResult<()> {
        let failures: Vec<TargetFailure> = self
            .targets
            .iter()
            .zip(results)
            .filter_map(|(target, result)| {
                result.err().map(|error| TargetFailure {
                    target: target.name().to_string(),
                    error,
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Fanout {
                failures,
                total: self.targets.len(),
            })
        }
    }
}

impl std::fmt::Debug for MultiTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.targets.iter().map(|t| t.name()))
            .finish()
    }
}

#[async_trait]
impl StorageTarget for MultiTarget {
    fn name(&self) -> &str {
        "multi"
    }

    /// Stat of the first target holding `path`.
    async fn stat(&self, path: &str) -> StorageResult<Option<EntryStat>> {
        for target in &self.targets {
            if let Some(stat) = target.stat(path).await? {
                return Ok(Some(stat));
            }
        }
        Ok(None)
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let results = join_all(self.targets.iter().map(|t| t.write(path, data.clone()))).await;
        self.collect(results)
    }

    async fn remove_all(&self, prefix: &str) -> StorageResult<()> {
        let results = join_all(self.targets.iter().map(|t| t.remove_all(prefix))).await;
        self.collect(results)
    }

    /// Digest from the first target holding `path`.
    async fn digest(&self, path: &str) -> StorageResult<String> {
        for target in &self.targets {
            match target.digest(path).await {
                Err(e) if e.is_not_found() => continue,
                other => return other,
            }
        }
        Err(StorageError::NotFound(path.to_string()))
    }
}

//! Directory-backed storage target.

use crate::error::{StorageError, StorageResult};
use crate::target::{normalize_path, sha256_hex, EntryStat, StorageTarget};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A storage target that writes files below a root directory.
///
/// # Durability
///
/// Each write goes to a sibling temp file which is synced and then renamed
/// over the destination, so a crash leaves either the old or the new file.
#[derive(Debug, Clone)]
pub struct FileTarget {
    name: String,
    root: PathBuf,
}

impl FileTarget {
    /// Creates a target rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("file:{}", root.display()),
            root,
        }
    }

    /// Overrides the target name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = normalize_path(path)?;
        Ok(relative
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl StorageTarget for FileTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<EntryStat>> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(Some(EntryStat {
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = temp_path(&full);
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp, &full).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_all(&self, prefix: &str) -> StorageResult<()> {
        let full = self.resolve(prefix)?;
        let result = match fs::symlink_metadata(&full).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full).await,
            Ok(_) => fs::remove_file(&full).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn digest(&self, path: &str) -> StorageResult<String> {
        let full = self.resolve(path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(sha256_hex(&data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

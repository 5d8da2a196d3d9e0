//! Durable checkpoint of the last processed sequence.
//!
//! The checkpoint file holds a single decimal sequence followed by a newline.
//! Writes go to `<file>.TMP`, are synced, renamed over the checkpoint, and
//! the parent directory is synced, so a crash leaves either the previous or
//! the new value on disk.
//!
//! Saves are coalesced: while one save is writing, further saves only record
//! the newest value, which the in-flight save picks up before returning.

use crate::error::{SkimError, SkimResult};
use parking_lot::Mutex;
use skim_protocol::Sequence;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

/// What a call to [`CheckpointStore::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The value (or a newer one) was written.
    Written,
    /// Another save is in flight; the value was queued for it.
    Deferred,
    /// The value is already persisted.
    Unchanged,
}

#[derive(Debug, Default)]
struct SaveState {
    saving: bool,
    persisted: Option<Sequence>,
    pending: Option<Sequence>,
}

/// File-backed checkpoint store.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    temp_path: PathBuf,
    state: Mutex<SaveState>,
}

/// Clears the in-flight flag if a write fails part-way.
struct SavingGuard<'a>(&'a Mutex<SaveState>);

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().saving = false;
    }
}

impl CheckpointStore {
    /// Creates a store for `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".TMP");
        let temp_path = path.with_file_name(temp_name);
        Self {
            path,
            temp_path,
            state: Mutex::new(SaveState::default()),
        }
    }

    /// Checkpoint file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the checkpoint.
    ///
    /// A missing or empty file means "start from the beginning".
    ///
    /// # Errors
    ///
    /// Returns [`SkimError::CorruptCheckpoint`] if the file holds anything
    /// other than a sequence number.
    pub async fn load(&self) -> SkimResult<Sequence> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let sequence = if content.trim().is_empty() {
            Sequence::ZERO
        } else {
            content
                .parse::<Sequence>()
                .map_err(|_| SkimError::CorruptCheckpoint {
                    path: self.path.clone(),
                    content: content.trim().to_string(),
                })?
        };

        self.state.lock().persisted = Some(sequence);
        debug!(path = %self.path.display(), %sequence, "loaded checkpoint");
        Ok(sequence)
    }

    /// Last value known to be on disk.
    pub fn persisted(&self) -> Option<Sequence> {
        self.state.lock().persisted
    }

    /// Value waiting for the in-flight save, if any.
    pub fn pending(&self) -> Option<Sequence> {
        self.state.lock().pending
    }

    /// Persists `sequence`.
    pub async fn save(&self, sequence: Sequence) -> SkimResult<SaveOutcome> {
        {
            let mut state = self.state.lock();
            if state.saving {
                state.pending = Some(sequence);
                trace!(%sequence, "checkpoint save deferred");
                return Ok(SaveOutcome::Deferred);
            }
            if state.persisted == Some(sequence) {
                return Ok(SaveOutcome::Unchanged);
            }
            state.saving = true;
        }

        let _guard = SavingGuard(&self.state);
        let mut sequence = sequence;
        loop {
            self.write(sequence).await?;

            let next = {
                let mut state = self.state.lock();
                state.persisted = Some(sequence);
                state.pending.take()
            };
            match next {
                Some(next) if next != sequence => sequence = next,
                _ => break,
            }
        }
        Ok(SaveOutcome::Written)
    }

    /// Writes a value left pending by a failed save.
    pub async fn flush(&self) -> SkimResult<()> {
        let pending = {
            let mut state = self.state.lock();
            if state.saving {
                return Ok(());
            }
            state.pending.take()
        };
        if let Some(sequence) = pending {
            self.save(sequence).await?;
        }
        Ok(())
    }

    async fn write(&self, sequence: Sequence) -> SkimResult<()> {
        let mut file = fs::File::create(&self.temp_path).await?;
        file.write_all(format!("{sequence}\n").as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&self.temp_path, &self.path).await?;
        self.sync_directory().await?;
        debug!(%sequence, "checkpoint saved");
        Ok(())
    }

    #[cfg(unix)]
    async fn sync_directory(&self) -> SkimResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::File::open(dir).await?.sync_all().await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_directory(&self) -> SkimResult<()> {
        Ok(())
    }
}

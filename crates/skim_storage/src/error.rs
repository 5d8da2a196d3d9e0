//! Error types for storage targets.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while writing to or reading from a target.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The path escapes the target root or is empty.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// Nothing is stored at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target refused the write.
    #[error("write rejected by {target}: {reason}")]
    Rejected {
        /// Target name.
        target: String,
        /// Why the write was refused.
        reason: String,
    },

    /// Some targets of a fan-out failed.
    #[error("{} of {total} targets failed: {}", .failures.len(), DisplayFailures(.failures))]
    Fanout {
        /// The failed targets.
        failures: Vec<TargetFailure>,
        /// Number of targets the operation was sent to.
        total: usize,
    },
}

impl StorageError {
    /// Returns true if the error is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// One failed target in a fan-out.
#[derive(Debug)]
pub struct TargetFailure {
    /// Target name.
    pub target: String,
    /// The error it returned.
    pub error: StorageError,
}

struct DisplayFailures<'a>(&'a [TargetFailure]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.target, failure.error)?;
        }
        Ok(())
    }
}

//! Error types for the skimmer.

use skim_protocol::{ProtocolError, Sequence};
use skim_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for skimmer operations.
pub type SkimResult<T> = Result<T, SkimError>;

/// Errors that can occur while processing the change feed.
#[derive(Error, Debug)]
pub enum SkimError {
    /// The database answered with an unexpected status.
    #[error("{method} {url} failed with status {status}")]
    Http {
        /// Request method.
        method: String,
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The write lost against a concurrent edit (HTTP 409).
    #[error("document update conflict for {id}")]
    Conflict {
        /// Document id.
        id: String,
    },

    /// The document or attachment does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The database returned something that is not a valid document.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A storage target failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Local I/O error (checkpoint file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The checkpoint file holds something other than a sequence number.
    #[error("corrupt checkpoint {path:?}: {content:?}")]
    CorruptCheckpoint {
        /// Checkpoint file.
        path: PathBuf,
        /// What was found in it.
        content: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The conflict purge loop did not converge.
    #[error("gave up purging {id} after {rounds} rounds")]
    PurgeLimitExceeded {
        /// Document id.
        id: String,
        /// Rounds attempted.
        rounds: u32,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The change feed is not running.
    #[error("change feed closed")]
    FeedClosed,

    /// A response was missing something the protocol requires.
    #[error("bad response: {0}")]
    BadResponse(String),

    /// Some artifacts of a change could not be delivered.
    #[error("{failed} artifacts of {id} were not delivered")]
    IncompleteTransfer {
        /// Document id.
        id: String,
        /// Failed artifact count.
        failed: usize,
    },

    /// Processing a change failed; the checkpoint was not advanced.
    #[error("change {sequence} ({id}) failed: {source}")]
    ChangeFailed {
        /// Sequence of the failed change.
        sequence: Sequence,
        /// Document id.
        id: String,
        /// Underlying error.
        source: Box<SkimError>,
    },
}

impl SkimError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true for a 409.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SkimError::Conflict { .. })
    }

    /// Returns true for a 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            SkimError::NotFound(_) => true,
            SkimError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Returns true if this error can be retried by restarting from the
    /// last checkpoint.
    pub fn is_retryable(&self) -> bool {
        match self {
            SkimError::Transport { retryable, .. } => *retryable,
            SkimError::Http { status, .. } => *status >= 500 || *status == 429,
            SkimError::Timeout => true,
            SkimError::Storage(StorageError::Io(_)) => true,
            SkimError::ChangeFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SkimError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SkimError::Timeout;
        }
        if let Some(status) = err.status() {
            return SkimError::Http {
                method: String::new(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            };
        }
        SkimError::Transport {
            message: err.to_string(),
            retryable: err.is_connect() || err.is_request() || err.is_body(),
        }
    }
}

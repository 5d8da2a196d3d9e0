//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding or encoding registry records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The document is not valid JSON or does not have the expected shape.
    #[error("invalid document json: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is structurally valid JSON but unusable.
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

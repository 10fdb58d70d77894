//! Error types for stow-core

use thiserror::Error;

use crate::remote::GatewayError;

/// Result type alias using stow-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stow-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No response from the remote service (offline, timeout, probe negative)
    #[error("Remote service unreachable: {0}")]
    Unreachable(String),

    /// Remote service answered with a non-success outcome
    #[error("Remote service rejected the request: {message} ({status})")]
    Rejected { status: u16, message: String },

    /// Local store write or read failed
    #[error("Local storage failure: {0}")]
    LocalStorage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing owner, missing remote id, or an operation the record's state forbids
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<GatewayError> for Error {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Unreachable(message) => Self::Unreachable(message),
            GatewayError::Rejected { status, message } => Self::Rejected { status, message },
        }
    }
}

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stow_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("No content provided")]
    EmptyContent,
    #[error("Nothing to change: pass at least one field to edit")]
    NothingToEdit,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("ID '{id}' belongs to a {actual}, not a {expected}")]
    WrongKind {
        id: String,
        expected: stow_core::RecordKind,
        actual: stow_core::RecordKind,
    },
    #[error("No owner given. Pass --owner or set STOW_OWNER_ID.")]
    MissingOwner,
    #[error("Sync is not configured. Set STOW_API_BASE_URL to the remote service URL.")]
    SyncNotConfigured,
}

//! Error types for the courier-store crate.
//!
//! Every store operation returns [`StoreError`], which separates I/O,
//! serialization, validation and logical failures.

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (snapshot read/write, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Message not found in the store.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// A message with this id is already queued.
    #[error("Message already exists: {0}")]
    AlreadyExists(MessageId),

    /// Store location validation failed.
    #[error("Store validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, background task failure, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Snapshot data is corrupted or incomplete.
    #[error("Corrupted store data: {0}")]
    Corrupted(String),
}

/// Store location validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Store path contains a `..` component.
    #[error("Store path cannot contain '..' components: {0}")]
    ParentComponent(String),

    /// Store path is relative.
    #[error("Store path must be absolute: {0}")]
    NotAbsolute(String),

    /// Store path is inside a system directory.
    #[error("Store path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: String, path: String },

    /// Store path exists but is not a directory.
    #[error("Store path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Store task failed: {e}"))
    }
}

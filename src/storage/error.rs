//! Storage layer error types
//!
//! All errors that can occur while talking to the record store are defined
//! here, together with the classification the transaction wrapper relies on
//! to decide between retrying and propagating.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, ModelName, RecordId};

/// Classification of a failure, queried by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Likely to succeed on retry: write conflicts, exhausted pools, journal I/O.
    Operational,
    /// The connection itself is gone and must be rebuilt.
    Interface,
    /// Deterministic failure raised by the operation or its data.
    Application,
    /// Misconfiguration detected before any transaction state is at risk.
    Configuration,
}

impl ErrorKind {
    /// Transient kinds may be retried by the transaction wrapper.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Operational | ErrorKind::Interface)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Operational => write!(f, "operational"),
            ErrorKind::Interface => write!(f, "interface"),
            ErrorKind::Application => write!(f, "application"),
            ErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the git journal
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// the requested record was not found
    #[error("record not found: model={model}, id={id}")]
    RecordNotFound { model: ModelName, id: RecordId },

    /// the model is not registered in the pool
    #[error("model not found: {0}")]
    ModelNotFound(ModelName),

    /// invalid model name
    #[error("invalid model name: {0}")]
    InvalidModelName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// a record was changed by another transaction since it was read
    #[error("could not serialize access: {model} {id} was modified concurrently")]
    SerializationFailure { model: ModelName, id: RecordId },

    /// no free connection left in the pool
    #[error("connection pool exhausted ({max} connections in use)")]
    PoolExhausted { max: usize },

    /// the connection backing a transaction was closed
    #[error("connection {0} already closed")]
    ConnectionClosed(usize),

    /// the database cannot be reached
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// journal data failed an integrity check
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Classify this error for the retry loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Git(_)
            | StorageError::SerializationFailure { .. }
            | StorageError::PoolExhausted { .. }
            | StorageError::Io(_) => ErrorKind::Operational,
            StorageError::ConnectionClosed(_) | StorageError::DatabaseUnavailable(_) => {
                ErrorKind::Interface
            }
            StorageError::ModelNotFound(_) | StorageError::InvalidModelName(_) => {
                ErrorKind::Configuration
            }
            StorageError::RecordNotFound { .. }
            | StorageError::Serialization(_)
            | StorageError::CorruptedData { .. }
            | StorageError::Internal(_) => ErrorKind::Application,
        }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RecordNotFound { .. } | StorageError::ModelNotFound(_)
        )
    }

    /// check if this error is a write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::SerializationFailure { .. })
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        self.kind().is_transient()
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

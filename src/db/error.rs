//! Error type of the transaction wrapper.

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::DomainError;
use crate::storage::{ErrorKind, StorageError};
use crate::transaction::TransactionError;

/// Result type for wrapped units of work.
pub type TdbResult<T> = Result<T, TdbError>;

#[derive(Debug, Error)]
pub enum TdbError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No model name given and the wrapper has no default.
    #[error("model name is missing")]
    MissingModelName,

    /// Raised by application code inside a unit of work.
    #[error("{0}")]
    Application(String),
}

impl TdbError {
    pub fn application(message: impl Into<String>) -> Self {
        TdbError::Application(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TdbError::Storage(e) => e.kind(),
            TdbError::Transaction(e) => e.kind(),
            TdbError::Config(e) => e.kind(),
            TdbError::MissingModelName => ErrorKind::Configuration,
            TdbError::Domain(_) | TdbError::Application(_) => ErrorKind::Application,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Whether a unit of work failing with this error may run again.
    ///
    /// Operational failures are retried only in read-write mode; interface
    /// failures in either mode.
    pub fn retry_allowed(&self, readonly: bool) -> bool {
        match self.kind() {
            ErrorKind::Operational => !readonly,
            ErrorKind::Interface => true,
            ErrorKind::Application | ErrorKind::Configuration => false,
        }
    }
}

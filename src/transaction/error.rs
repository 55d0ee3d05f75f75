//! Transaction error types.

use thiserror::Error;

use crate::storage::{ErrorKind, ModelName, StorageError};

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Write attempted on a read-only transaction.
    #[error("transaction {tx_id} is read-only, cannot write to {model}")]
    ReadOnly { tx_id: String, model: ModelName },

    /// Creation payload misses a required field.
    #[error("{field} is missing in {model} values")]
    MissingField { model: ModelName, field: String },

    /// Request method not understood.
    #[error("unknown request method: {0}")]
    UnknownMethod(String),

    /// Internal error.
    #[error("internal transaction error: {0}")]
    Internal(String),
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::Storage(e) => e.kind(),
            TransactionError::MissingField { .. } => ErrorKind::Configuration,
            TransactionError::ReadOnly { .. }
            | TransactionError::UnknownMethod(_)
            | TransactionError::Internal(_) => ErrorKind::Application,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordId;

    #[test]
    fn test_error_retryable() {
        let model = ModelName::new("checksum").unwrap();
        let conflict = TransactionError::from(StorageError::SerializationFailure {
            model: model.clone(),
            id: RecordId::new(1),
        });
        assert!(conflict.is_retryable());
        assert_eq!(conflict.kind(), ErrorKind::Operational);

        let read_only = TransactionError::ReadOnly {
            tx_id: "tx001".to_string(),
            model: model.clone(),
        };
        assert!(!read_only.is_retryable());

        let missing = TransactionError::MissingField {
            model,
            field: "code".to_string(),
        };
        assert_eq!(missing.kind(), ErrorKind::Configuration);
        assert_eq!(missing.to_string(), "code is missing in checksum values");
    }
}

//! Error types for the config store.

use thiserror::Error;

use crate::store::VersionToken;

/// Result type alias for config store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during config store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    /// The stored version no longer matches the one the writer observed.
    #[error("conditional write on {key} rejected: expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<VersionToken>,
        actual: Option<VersionToken>,
    },
}

impl StoreError {
    /// Backend failures that may succeed if the caller tries again later.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Conflict { .. })
    }
}

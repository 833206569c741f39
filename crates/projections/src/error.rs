//! Projection error types.

use thiserror::Error;

/// Errors that can occur while building views or auditing the ledger.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the ledger store.
    #[error("Ledger store error: {0}")]
    Store(#[from] ledger_store::LedgerStoreError),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// An optimistic version check failed. Another writer changed the record
    /// after it was read.
    #[error("Concurrency conflict on {entity} {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: Version,
        actual: Version,
    },

    /// A row lock could not be taken within the lock timeout. Another writer
    /// holds it, so this is treated like a version conflict.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A product with this SKU already exists.
    #[error("Duplicate SKU: {0}")]
    DuplicateSku(String),

    /// A record failed validation before it was written.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerStoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true for optimistic concurrency failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::LockTimeout(_))
    }

    /// Maps PostgreSQL timeout SQLSTATEs onto conflict or unavailability.
    fn from_sqlstate(code: &str, message: String) -> Option<Self> {
        match code {
            // lock_not_available
            "55P03" => Some(Self::LockTimeout(message)),
            // query_canceled (statement_timeout), idle_in_transaction_session_timeout
            "57014" | "25P03" => Some(Self::Unavailable(message)),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for LedgerStoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db_err) => {
                let mapped = db_err
                    .code()
                    .and_then(|code| Self::from_sqlstate(&code, db_err.message().to_string()));
                mapped.unwrap_or(Self::Database(err))
            }
            other => Self::Database(other),
        }
    }
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, LedgerStoreError>;

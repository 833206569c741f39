//! Error taxonomy of the stock ledger core.

use common::{OrderId, OrderStatus, ProductId};
use ledger_store::LedgerStoreError;
use thiserror::Error;

/// Errors surfaced by ledger operations.
///
/// Only [`StockError::Conflict`] and [`StockError::Unavailable`] are worth
/// retrying; everything else is a caller or business-rule rejection.
#[derive(Debug, Error)]
pub enum StockError {
    /// Unknown product, batch or order.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request itself is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Not enough stock to satisfy a line. Shown to end users.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, only {available} available (short by {shortfall})"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
        shortfall: i64,
    },

    /// The target status is not reachable from the order's current status.
    #[error("Invalid transition for order {order_id}: cannot go from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Concurrent writers kept winning; gave up after `attempts` tries.
    #[error("Conflicting concurrent update, gave up after {attempts} attempt(s)")]
    Conflict { attempts: u32 },

    /// The store could not be reached.
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    /// Any other store failure.
    #[error("Ledger store error: {0}")]
    Store(#[source] LedgerStoreError),
}

impl StockError {
    /// Returns true if the whole operation may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::Conflict { .. } | StockError::Unavailable(_))
    }
}

impl From<LedgerStoreError> for StockError {
    fn from(err: LedgerStoreError) -> Self {
        match err {
            LedgerStoreError::NotFound { entity, id } => StockError::NotFound { entity, id },
            LedgerStoreError::ConcurrencyConflict { .. } | LedgerStoreError::LockTimeout(_) => {
                StockError::Conflict { attempts: 1 }
            }
            LedgerStoreError::Unavailable(msg) => StockError::Unavailable(msg),
            LedgerStoreError::InvalidRecord(msg) => StockError::InvalidArgument(msg),
            LedgerStoreError::DuplicateSku(sku) => {
                StockError::InvalidArgument(format!("SKU already registered: {sku}"))
            }
            other => StockError::Store(other),
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, StockError>;

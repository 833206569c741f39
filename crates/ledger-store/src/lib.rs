//! Persistent side of the stock ledger.
//!
//! This crate owns the records the ledger is built from and the storage
//! boundary that persists them:
//! - [`LedgerStore`] trait with in-memory and PostgreSQL implementations
//! - Append-only [`Movement`] log, never updated or deleted
//! - Optimistic [`Version`] checks on batches and orders

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use common::{ActorId, BatchId, Money, MovementId, OrderId, OrderStatus, ProductId};
pub use error::{LedgerStoreError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::MovementQuery;
pub use record::{
    Batch, BatchLedger, LedgerEntry, Movement, MovementKind, NewBatch, NewMovement, NewProduct,
    Order, OrderCommit, OrderLine, Product, Version,
};
pub use store::{LedgerStore, LedgerStoreExt, MovementStream};

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{
    ActorId, Batch, BatchId, BatchLedger, LedgerStoreError, Money, Movement, MovementQuery,
    NewBatch, NewProduct, Order, OrderCommit, OrderId, OrderStatus, Product, ProductId, Result,
    Version,
};

/// A stream of movements in sequence order.
pub type MovementStream = Pin<Box<dyn Stream<Item = Result<Movement>> + Send>>;

/// Storage boundary of the stock ledger.
///
/// Implementations must be thread-safe and may be shared by many concurrent
/// request handlers, possibly across several processes. Every write is
/// atomic: it either fully happens or leaves the store untouched.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Registers a product. Fails with `DuplicateSku` if the SKU is taken.
    async fn insert_product(&self, product: NewProduct) -> Result<Product>;

    /// Retrieves a product by id.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Retrieves a product by SKU.
    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>>;

    /// Lists all products ordered by SKU.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Records a stock-in: creates the batch and its single `in` movement.
    async fn receive_batch(&self, batch: NewBatch) -> Result<(Batch, Movement)>;

    /// Retrieves a batch by id.
    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>>;

    /// Lists a product's batches ordered oldest first, ties broken by id.
    async fn batches_for_product(&self, product_id: ProductId) -> Result<Vec<Batch>>;

    /// Corrects a batch's unit cost in one write and returns the updated
    /// batch together with the cost it replaced. Quantities and versions are
    /// untouched.
    async fn update_batch_cost(&self, batch_id: BatchId, unit_cost: Money)
    -> Result<(Batch, Money)>;

    /// Returns a batch with its movements, each sale joined with the current
    /// status of the order it references.
    async fn batch_ledger(&self, batch_id: BatchId) -> Result<BatchLedger>;

    /// Returns the ledgers of all of a product's batches, oldest batch first,
    /// read from one consistent snapshot.
    async fn product_ledger(&self, product_id: ProductId) -> Result<Vec<BatchLedger>>;

    /// Retrieves movements matching a query, in sequence order.
    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<Movement>>;

    /// Streams the whole movement log in sequence order.
    async fn stream_movements(&self) -> Result<MovementStream>;

    /// Retrieves an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists orders, optionally only those in one status, oldest first.
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;

    /// Writes an order and its sale movements in one transaction.
    ///
    /// Fails with `ConcurrencyConflict` if any batch in
    /// `commit.expected_versions` is no longer at that version. On success
    /// every touched batch's version has been bumped.
    async fn commit_order(&self, commit: OrderCommit) -> Result<Order>;

    /// Sets an order's status if the order is still at `expected` version.
    ///
    /// The movement log is never touched.
    async fn update_order_status(
        &self,
        order_id: OrderId,
        expected: Version,
        status: OrderStatus,
        actor: &ActorId,
    ) -> Result<Order>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Retrieves a product, failing with `NotFound` if it does not exist.
    async fn require_product(&self, product_id: ProductId) -> Result<Product> {
        self.get_product(product_id)
            .await?
            .ok_or_else(|| LedgerStoreError::not_found("product", product_id))
    }

    /// Retrieves a batch, failing with `NotFound` if it does not exist.
    async fn require_batch(&self, batch_id: BatchId) -> Result<Batch> {
        self.get_batch(batch_id)
            .await?
            .ok_or_else(|| LedgerStoreError::not_found("batch", batch_id))
    }

    /// Retrieves an order, failing with `NotFound` if it does not exist.
    async fn require_order(&self, order_id: OrderId) -> Result<Order> {
        self.get_order(order_id)
            .await?
            .ok_or_else(|| LedgerStoreError::not_found("order", order_id))
    }

    /// Returns the sale movements written for an order.
    async fn movements_for_order(&self, order_id: OrderId) -> Result<Vec<Movement>> {
        self.query_movements(MovementQuery::for_order(order_id))
            .await
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

/// Merges the expected batch versions of a commit, rejecting a batch that
/// appears with two different versions.
pub(crate) fn dedup_expected_versions(
    expected: &[(BatchId, Version)],
) -> Result<Vec<(BatchId, Version)>> {
    let mut merged: Vec<(BatchId, Version)> = Vec::with_capacity(expected.len());
    for &(batch_id, version) in expected {
        match merged.iter().find(|(id, _)| *id == batch_id) {
            Some((_, seen)) if *seen != version => {
                return Err(LedgerStoreError::InvalidRecord(format!(
                    "batch {batch_id} expected at versions {seen} and {version}"
                )));
            }
            Some(_) => {}
            None => merged.push((batch_id, version)),
        }
    }
    // Lock order for the PostgreSQL implementation; keeps concurrent commits
    // from deadlocking on each other's batch rows.
    merged.sort_by_key(|(id, _)| *id);
    Ok(merged)
}

//! Derived stock figures.
//!
//! Availability is never stored. It is recomputed from a batch's movements
//! joined with the *current* status of every order those movements reference.

use common::{BatchId, OrderStatus, ProductId};
use ledger_store::{Batch, BatchLedger, LedgerStore, MovementKind};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-batch quantity breakdown.
///
/// `consumed` counts sales whose order is in a consuming status. Sales of
/// returned and cancelled orders are kept apart so reports can show them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFigures {
    pub received: i64,
    pub consumed: i64,
    pub returned: i64,
    pub cancelled: i64,
}

impl StockFigures {
    /// Units still available for allocation, never below zero.
    pub fn remaining(&self) -> i64 {
        self.net().max(0)
    }

    /// Received minus consumed, unclamped. Negative means the batch is
    /// oversold, which a correct ledger never reaches.
    pub fn net(&self) -> i64 {
        self.received - self.consumed
    }

    fn add(&mut self, other: &StockFigures) {
        self.received = self.received.saturating_add(other.received);
        self.consumed = self.consumed.saturating_add(other.consumed);
        self.returned = self.returned.saturating_add(other.returned);
        self.cancelled = self.cancelled.saturating_add(other.cancelled);
    }
}

/// Folds a batch's ledger into its figures.
///
/// A sale whose order status could not be read is counted as consumed: an
/// unknown order must never free stock. Totals saturate at `i64::MAX`.
pub fn summarize(ledger: &BatchLedger) -> StockFigures {
    let mut figures = StockFigures::default();
    for entry in &ledger.entries {
        let units = entry.movement.units();
        match entry.movement.kind {
            MovementKind::In => figures.received = figures.received.saturating_add(units),
            MovementKind::Sale => match entry.order_status {
                Some(OrderStatus::Returned) => {
                    figures.returned = figures.returned.saturating_add(units)
                }
                Some(OrderStatus::Cancelled) => {
                    figures.cancelled = figures.cancelled.saturating_add(units)
                }
                Some(status) if !status.is_consuming() => {}
                _ => figures.consumed = figures.consumed.saturating_add(units),
            },
        }
    }
    figures
}

/// A batch together with its derived figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStock {
    pub batch: Batch,
    #[serde(flatten)]
    pub figures: StockFigures,
    pub remaining: i64,
}

impl BatchStock {
    pub fn from_ledger(ledger: &BatchLedger) -> Self {
        let figures = summarize(ledger);
        Self {
            batch: ledger.batch.clone(),
            figures,
            remaining: figures.remaining(),
        }
    }
}

/// Stock of one product across all of its batches, oldest batch first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: ProductId,
    pub totals: StockFigures,
    pub remaining: i64,
    pub batches: Vec<BatchStock>,
}

impl ProductStock {
    pub fn from_ledgers(product_id: ProductId, ledgers: &[BatchLedger]) -> Self {
        let batches: Vec<BatchStock> = ledgers.iter().map(BatchStock::from_ledger).collect();
        let mut totals = StockFigures::default();
        for batch in &batches {
            totals.add(&batch.figures);
        }
        // Sum of clamped batch figures; one oversold batch must not hide
        // another batch's stock.
        let remaining = batches
            .iter()
            .fold(0i64, |acc, b| acc.saturating_add(b.remaining));
        Self {
            product_id,
            totals,
            remaining,
            batches,
        }
    }
}

/// Read-only availability queries over a ledger store.
#[derive(Debug, Clone)]
pub struct AvailabilityCalculator<S> {
    store: S,
}

impl<S: LedgerStore> AvailabilityCalculator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Units currently available in one batch.
    #[tracing::instrument(skip(self))]
    pub async fn available_for_batch(&self, batch_id: BatchId) -> Result<i64> {
        Ok(self.batch_stock(batch_id).await?.remaining)
    }

    /// Units currently available across all of a product's batches. A
    /// product without batches has zero available.
    #[tracing::instrument(skip(self))]
    pub async fn available_for_product(&self, product_id: ProductId) -> Result<i64> {
        Ok(self.product_stock(product_id).await?.remaining)
    }

    /// Full breakdown for one batch.
    pub async fn batch_stock(&self, batch_id: BatchId) -> Result<BatchStock> {
        let ledger = self.store.batch_ledger(batch_id).await?;
        Ok(BatchStock::from_ledger(&ledger))
    }

    /// Full breakdown for one product.
    pub async fn product_stock(&self, product_id: ProductId) -> Result<ProductStock> {
        let ledgers = self.store.product_ledger(product_id).await?;
        Ok(ProductStock::from_ledgers(product_id, &ledgers))
    }
}

//! Inventory reporting: per-batch breakdown and stock valuation.

use chrono::{DateTime, Utc};
use common::{BatchId, Money, ProductId};
use ledger_store::{BatchLedger, LedgerStore, LedgerStoreExt, Product};
use serde::{Deserialize, Serialize};

use crate::availability::{BatchStock, ProductStock, StockFigures};
use crate::error::Result;

/// One row of the inventory report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub lot_number: String,
    pub received_at: DateTime<Utc>,
    pub unit_cost: Money,
    #[serde(flatten)]
    pub figures: StockFigures,
    pub remaining: i64,
    /// Remaining units valued at the batch's unit cost.
    pub stock_value: Money,
    /// True when no unit cost has been entered for the batch yet.
    pub cost_missing: bool,
}

impl From<&BatchStock> for BatchReport {
    fn from(stock: &BatchStock) -> Self {
        let batch = &stock.batch;
        Self {
            batch_id: batch.id,
            lot_number: batch.lot_number.clone(),
            received_at: batch.received_at,
            unit_cost: batch.unit_cost,
            figures: stock.figures,
            remaining: stock.remaining,
            stock_value: batch.unit_cost.times(stock.remaining),
            cost_missing: batch.unit_cost.is_zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductReport {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub min_stock_alert: i64,
    pub totals: StockFigures,
    pub remaining: i64,
    pub stock_value: Money,
    pub low_stock: bool,
    pub batches: Vec<BatchReport>,
}

impl ProductReport {
    pub fn new(product: &Product, stock: &ProductStock) -> Self {
        let batches: Vec<BatchReport> = stock.batches.iter().map(BatchReport::from).collect();
        Self {
            product_id: product.id,
            sku: product.sku.clone(),
            name: product.name.clone(),
            min_stock_alert: product.min_stock_alert,
            totals: stock.totals,
            remaining: stock.remaining,
            stock_value: batches.iter().map(|b| b.stock_value).sum(),
            low_stock: stock.remaining <= product.min_stock_alert,
            batches,
        }
    }
}

/// Read-side reports over the ledger.
pub struct InventoryReport<S> {
    store: S,
}

impl<S: LedgerStore> InventoryReport<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn batch_report(&self, batch_id: BatchId) -> Result<BatchReport> {
        let ledger = self.store.batch_ledger(batch_id).await?;
        Ok(BatchReport::from(&BatchStock::from_ledger(&ledger)))
    }

    pub async fn product_report(&self, product_id: ProductId) -> Result<ProductReport> {
        let product = self.store.require_product(product_id).await?;
        let ledgers = self.store.product_ledger(product_id).await?;
        Ok(Self::build(&product, &ledgers))
    }

    /// Every product, ordered by SKU.
    #[tracing::instrument(skip(self))]
    pub async fn inventory(&self) -> Result<Vec<ProductReport>> {
        let products = self.store.list_products().await?;
        let mut reports = Vec::with_capacity(products.len());
        for product in &products {
            let ledgers = self.store.product_ledger(product.id).await?;
            reports.push(Self::build(product, &ledgers));
        }
        Ok(reports)
    }

    /// Products at or below their minimum-stock threshold.
    pub async fn low_stock(&self) -> Result<Vec<ProductReport>> {
        let reports = self.inventory().await?;
        Ok(reports.into_iter().filter(|r| r.low_stock).collect())
    }

    fn build(product: &Product, ledgers: &[BatchLedger]) -> ProductReport {
        ProductReport::new(product, &ProductStock::from_ledgers(product.id, ledgers))
    }
}

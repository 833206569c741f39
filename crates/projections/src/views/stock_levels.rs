//! Stock levels read model: per-batch figures rebuilt from the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{BatchId, ProductId};
use domain::{BatchStock, ProductStock};
use ledger_store::LedgerStore;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::read_model::ReadModel;

/// Cached stock summary of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductLevel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub min_stock_alert: i64,
    pub remaining: i64,
    pub batch_count: usize,
}

impl ProductLevel {
    pub fn is_low(&self) -> bool {
        self.remaining <= self.min_stock_alert
    }
}

/// What a refresh rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub products: usize,
    pub batches: usize,
}

#[derive(Default)]
struct StockLevelsState {
    batches: HashMap<BatchId, BatchStock>,
    products: HashMap<ProductId, ProductLevel>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Materialized stock levels.
///
/// The view is only ever replaced wholesale by [`refresh`](Self::refresh);
/// nothing increments or decrements it. Between refreshes it may lag the
/// ledger, which stays the source of truth.
#[derive(Clone, Default)]
pub struct StockLevelsView {
    state: Arc<RwLock<StockLevelsState>>,
}

impl StockLevelsView {
    /// Creates a new empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes every product and batch from the ledger and swaps the
    /// result in.
    #[tracing::instrument(skip(self, store))]
    pub async fn refresh<S: LedgerStore + ?Sized>(&self, store: &S) -> Result<RefreshSummary> {
        let products = store.list_products().await?;

        let mut next = StockLevelsState::default();
        for product in products {
            let ledgers = store.product_ledger(product.id).await?;
            let stock = ProductStock::from_ledgers(product.id, &ledgers);
            next.products.insert(
                product.id,
                ProductLevel {
                    product_id: product.id,
                    sku: product.sku,
                    name: product.name,
                    min_stock_alert: product.min_stock_alert,
                    remaining: stock.remaining,
                    batch_count: stock.batches.len(),
                },
            );
            for batch in stock.batches {
                next.batches.insert(batch.batch.id, batch);
            }
        }
        next.refreshed_at = Some(Utc::now());

        let summary = RefreshSummary {
            products: next.products.len(),
            batches: next.batches.len(),
        };
        *self.state.write().await = next;

        tracing::debug!(
            products = summary.products,
            batches = summary.batches,
            "stock levels refreshed"
        );
        Ok(summary)
    }

    /// Cached figures for one batch.
    pub async fn batch(&self, batch_id: BatchId) -> Option<BatchStock> {
        self.state.read().await.batches.get(&batch_id).cloned()
    }

    /// Cached remaining units of one product.
    pub async fn product_remaining(&self, product_id: ProductId) -> Option<i64> {
        self.state
            .read()
            .await
            .products
            .get(&product_id)
            .map(|p| p.remaining)
    }

    /// Gets all products.
    pub async fn products(&self) -> Vec<ProductLevel> {
        let mut products: Vec<_> = self.state.read().await.products.values().cloned().collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        products
    }

    /// Products at or below their alert threshold, lowest stock first.
    pub async fn low_stock_products(&self) -> Vec<ProductLevel> {
        let mut low: Vec<_> = self
            .state
            .read()
            .await
            .products
            .values()
            .filter(|p| p.is_low())
            .cloned()
            .collect();
        low.sort_by(|a, b| a.remaining.cmp(&b.remaining).then(a.sku.cmp(&b.sku)));
        low
    }

    /// Remaining units of every cached batch.
    pub async fn batch_remaining(&self) -> HashMap<BatchId, i64> {
        self.state
            .read()
            .await
            .batches
            .iter()
            .map(|(id, stock)| (*id, stock.remaining))
            .collect()
    }

    /// When the view was last rebuilt; `None` if never.
    pub async fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.refreshed_at
    }
}

impl ReadModel for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    fn count(&self) -> usize {
        // Returns 0 rather than blocking while a refresh holds the lock
        self.state.try_read().map(|s| s.batches.len()).unwrap_or(0)
    }
}

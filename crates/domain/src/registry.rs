//! Products and their receipt batches.

use chrono::{DateTime, Utc};
use common::{ActorId, BatchId, Money, ProductId};
use ledger_store::{Batch, LedgerStore, LedgerStoreExt, NewBatch, NewProduct, Product};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StockError};

/// A stock-in request for one new batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIn {
    pub lot_number: String,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost: Money,
    /// Defaults to now.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

/// Stock-in side of the batch registry, plus cost correction.
pub struct BatchRegistry<S> {
    store: S,
}

impl<S: LedgerStore> BatchRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn register_product(&self, product: NewProduct) -> Result<Product> {
        let product = self.store.insert_product(product).await?;
        tracing::info!(product_id = %product.id, sku = %product.sku, "product registered");
        Ok(product)
    }

    /// Records a new batch and its `in` movement.
    #[tracing::instrument(skip(self))]
    pub async fn receive_stock(
        &self,
        product_id: ProductId,
        stock_in: StockIn,
        actor: &ActorId,
    ) -> Result<Batch> {
        if stock_in.quantity <= 0 {
            return Err(StockError::InvalidArgument(format!(
                "received quantity must be positive, got {}",
                stock_in.quantity
            )));
        }
        if stock_in.unit_cost.is_negative() {
            return Err(StockError::InvalidArgument(
                "unit cost must not be negative".into(),
            ));
        }

        let (batch, movement) = self
            .store
            .receive_batch(NewBatch {
                product_id,
                lot_number: stock_in.lot_number,
                quantity: stock_in.quantity,
                unit_cost: stock_in.unit_cost,
                received_at: stock_in.received_at.unwrap_or_else(Utc::now),
                received_by: actor.clone(),
            })
            .await?;
        tracing::info!(
            batch_id = %batch.id,
            quantity = movement.quantity_changed,
            "stock received"
        );
        Ok(batch)
    }

    /// Administrative fix of a batch's unit cost. Quantities and
    /// availability are unaffected.
    #[tracing::instrument(skip(self))]
    pub async fn correct_unit_cost(
        &self,
        batch_id: BatchId,
        unit_cost: Money,
        actor: &ActorId,
    ) -> Result<Batch> {
        if unit_cost.is_negative() {
            return Err(StockError::InvalidArgument(
                "unit cost must not be negative".into(),
            ));
        }
        let (batch, previous) = self.store.update_batch_cost(batch_id, unit_cost).await?;
        tracing::info!(
            %batch_id,
            %actor,
            from = %previous,
            to = %batch.unit_cost,
            "unit cost corrected"
        );
        Ok(batch)
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product> {
        Ok(self.store.require_product(product_id).await?)
    }

    pub async fn product_by_sku(&self, sku: &str) -> Result<Product> {
        self.store
            .get_product_by_sku(sku)
            .await?
            .ok_or_else(|| StockError::NotFound {
                entity: "product",
                id: sku.to_string(),
            })
    }

    pub async fn products(&self) -> Result<Vec<Product>> {
        Ok(self.store.list_products().await?)
    }

    pub async fn batch(&self, batch_id: BatchId) -> Result<Batch> {
        Ok(self.store.require_batch(batch_id).await?)
    }

    /// A product's batches, oldest first.
    pub async fn batches(&self, product_id: ProductId) -> Result<Vec<Batch>> {
        self.store.require_product(product_id).await?;
        Ok(self.store.batches_for_product(product_id).await?)
    }
}

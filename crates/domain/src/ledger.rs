//! Single entry point bundling every ledger operation over one store.

use common::{ActorId, BatchId, Money, OrderId, OrderStatus, ProductId};
use ledger_store::{Batch, LedgerStore, LedgerStoreExt, Movement, NewProduct, Order, Product};
use serde::{Deserialize, Serialize};

use crate::allocator::{AllocationPlan, FifoAllocator};
use crate::availability::{AvailabilityCalculator, BatchStock, ProductStock};
use crate::coordinator::{AllocationCoordinator, OrderDraft, RetryPolicy};
use crate::error::Result;
use crate::lifecycle::OrderLifecycle;
use crate::registry::{BatchRegistry, StockIn};
use crate::report::{InventoryReport, ProductReport};

/// An order together with the sale movements written for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub movements: Vec<Movement>,
    /// Whether the order's movements currently count against stock.
    pub consuming: bool,
}

/// Entry point bundling every ledger operation over one store handle.
///
/// Cheap to share behind an `Arc`; the store itself carries all state.
pub struct InventoryLedger<S: LedgerStore + Clone> {
    store: S,
    availability: AvailabilityCalculator<S>,
    allocator: FifoAllocator<S>,
    coordinator: AllocationCoordinator<S>,
    lifecycle: OrderLifecycle<S>,
    registry: BatchRegistry<S>,
    reports: InventoryReport<S>,
}

impl<S: LedgerStore + Clone> InventoryLedger<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self {
            availability: AvailabilityCalculator::new(store.clone()),
            allocator: FifoAllocator::new(store.clone()),
            coordinator: AllocationCoordinator::new(store.clone(), retry),
            lifecycle: OrderLifecycle::new(store.clone(), retry),
            registry: BatchRegistry::new(store.clone()),
            reports: InventoryReport::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // Registry

    pub async fn register_product(&self, product: NewProduct) -> Result<Product> {
        self.registry.register_product(product).await
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product> {
        self.registry.product(product_id).await
    }

    pub async fn products(&self) -> Result<Vec<Product>> {
        self.registry.products().await
    }

    pub async fn batches(&self, product_id: ProductId) -> Result<Vec<Batch>> {
        self.registry.batches(product_id).await
    }

    pub async fn receive_stock(
        &self,
        product_id: ProductId,
        stock_in: StockIn,
        actor: &ActorId,
    ) -> Result<Batch> {
        self.registry.receive_stock(product_id, stock_in, actor).await
    }

    pub async fn correct_unit_cost(
        &self,
        batch_id: BatchId,
        unit_cost: Money,
        actor: &ActorId,
    ) -> Result<Batch> {
        self.registry
            .correct_unit_cost(batch_id, unit_cost, actor)
            .await
    }

    // Availability

    pub async fn available_for_batch(&self, batch_id: BatchId) -> Result<i64> {
        self.availability.available_for_batch(batch_id).await
    }

    pub async fn available_for_product(&self, product_id: ProductId) -> Result<i64> {
        self.availability.available_for_product(product_id).await
    }

    pub async fn batch_stock(&self, batch_id: BatchId) -> Result<BatchStock> {
        self.availability.batch_stock(batch_id).await
    }

    pub async fn product_stock(&self, product_id: ProductId) -> Result<ProductStock> {
        self.availability.product_stock(product_id).await
    }

    // Allocation

    pub async fn plan(&self, product_id: ProductId, requested: i64) -> Result<AllocationPlan> {
        self.allocator.plan(product_id, requested).await
    }

    pub async fn plan_order(&self, draft: &OrderDraft) -> Result<Vec<AllocationPlan>> {
        draft.validate()?;
        self.coordinator.plan_order(draft).await
    }

    pub async fn commit(&self, draft: OrderDraft, actor: &ActorId) -> Result<OrderId> {
        self.coordinator.commit(draft, actor).await
    }

    // Orders

    pub async fn transition(
        &self,
        order_id: OrderId,
        next: OrderStatus,
        actor: &ActorId,
    ) -> Result<Order> {
        self.lifecycle.transition(order_id, next, actor).await
    }

    pub async fn transition_named(
        &self,
        order_id: OrderId,
        next: &str,
        actor: &ActorId,
    ) -> Result<Order> {
        self.lifecycle.transition_named(order_id, next, actor).await
    }

    pub async fn order(&self, order_id: OrderId) -> Result<OrderDetail> {
        let order = self.store.require_order(order_id).await?;
        let movements = self.store.movements_for_order(order_id).await?;
        Ok(OrderDetail {
            consuming: order.status.is_consuming(),
            order,
            movements,
        })
    }

    pub async fn orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(status).await?)
    }

    // Reports

    pub async fn product_report(&self, product_id: ProductId) -> Result<ProductReport> {
        self.reports.product_report(product_id).await
    }

    pub async fn inventory(&self) -> Result<Vec<ProductReport>> {
        self.reports.inventory().await
    }

    pub async fn low_stock(&self) -> Result<Vec<ProductReport>> {
        self.reports.low_stock().await
    }
}

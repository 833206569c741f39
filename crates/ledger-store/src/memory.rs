use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    ActorId, Batch, BatchId, BatchLedger, LedgerEntry, LedgerStoreError, Money, Movement,
    MovementId, MovementKind, MovementQuery, NewBatch, NewProduct, Order, OrderCommit, OrderId,
    OrderStatus, Product, ProductId, Result, Version,
    store::{LedgerStore, MovementStream, dedup_expected_versions},
};

#[derive(Default)]
struct State {
    products: HashMap<ProductId, Product>,
    batches: HashMap<BatchId, Batch>,
    movements: Vec<Movement>,
    orders: HashMap<OrderId, Order>,
    next_sequence: i64,
    injected_conflicts: u32,
    unavailable: bool,
}

impl State {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(LedgerStoreError::Unavailable(
                "in-memory store marked unavailable".into(),
            ));
        }
        Ok(())
    }

    fn append(&mut self, mut movement: Movement) -> Movement {
        self.next_sequence += 1;
        movement.sequence = self.next_sequence;
        self.movements.push(movement.clone());
        movement
    }

    fn ledger(&self, batch: &Batch) -> BatchLedger {
        let entries = self
            .movements
            .iter()
            .filter(|m| m.batch_id == batch.id)
            .map(|m| LedgerEntry {
                movement: m.clone(),
                order_status: m
                    .order_id
                    .and_then(|id| self.orders.get(&id))
                    .map(|order| order.status),
            })
            .collect();

        BatchLedger {
            batch: batch.clone(),
            entries,
        }
    }

    fn product_batches(&self, product_id: ProductId) -> Vec<Batch> {
        let mut batches: Vec<_> = self
            .batches
            .values()
            .filter(|b| b.product_id == product_id)
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        batches
    }
}

/// In-memory ledger store for tests and single-process deployments.
///
/// All state sits behind one lock, so every write is atomic and every read
/// sees a consistent snapshot.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of movements in the log.
    pub async fn movement_count(&self) -> usize {
        self.state.read().await.movements.len()
    }

    /// Returns the total number of orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Makes the next `count` commits fail with a concurrency conflict, as if
    /// another writer had raced them.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn inject_commit_conflicts(&self, count: u32) {
        self.state.write().await.injected_conflicts = count;
    }

    /// Makes every operation fail with `Unavailable` until reset.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;
        let mut state = self.state.write().await;
        state.check_available()?;

        if state.products.values().any(|p| p.sku == product.sku) {
            return Err(LedgerStoreError::DuplicateSku(product.sku));
        }

        let product = Product {
            id: ProductId::new(),
            sku: product.sku,
            name: product.name,
            min_stock_alert: product.min_stock_alert,
            created_at: Utc::now(),
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.products.get(&product_id).cloned())
    }

    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.products.values().find(|p| p.sku == sku).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        state.check_available()?;
        let mut products: Vec<_> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(products)
    }

    async fn receive_batch(&self, batch: NewBatch) -> Result<(Batch, Movement)> {
        batch.validate()?;
        let mut state = self.state.write().await;
        state.check_available()?;

        if !state.products.contains_key(&batch.product_id) {
            return Err(LedgerStoreError::not_found("product", batch.product_id));
        }

        let record = Batch {
            id: BatchId::new(),
            product_id: batch.product_id,
            lot_number: batch.lot_number,
            unit_cost: batch.unit_cost,
            received_at: batch.received_at,
            version: Version::initial(),
        };
        let movement = state.append(Movement {
            id: MovementId::new(),
            sequence: 0,
            batch_id: record.id,
            kind: MovementKind::In,
            quantity_changed: batch.quantity,
            order_id: None,
            created_at: Utc::now(),
            recorded_by: batch.received_by,
        });
        state.batches.insert(record.id, record.clone());

        Ok((record, movement))
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.batches.get(&batch_id).cloned())
    }

    async fn batches_for_product(&self, product_id: ProductId) -> Result<Vec<Batch>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.product_batches(product_id))
    }

    async fn update_batch_cost(
        &self,
        batch_id: BatchId,
        unit_cost: Money,
    ) -> Result<(Batch, Money)> {
        if unit_cost.is_negative() {
            return Err(LedgerStoreError::InvalidRecord(
                "unit cost must not be negative".into(),
            ));
        }
        let mut state = self.state.write().await;
        state.check_available()?;

        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| LedgerStoreError::not_found("batch", batch_id))?;
        let previous = std::mem::replace(&mut batch.unit_cost, unit_cost);
        Ok((batch.clone(), previous))
    }

    async fn batch_ledger(&self, batch_id: BatchId) -> Result<BatchLedger> {
        let state = self.state.read().await;
        state.check_available()?;
        let batch = state
            .batches
            .get(&batch_id)
            .ok_or_else(|| LedgerStoreError::not_found("batch", batch_id))?;
        Ok(state.ledger(batch))
    }

    async fn product_ledger(&self, product_id: ProductId) -> Result<Vec<BatchLedger>> {
        let state = self.state.read().await;
        state.check_available()?;
        if !state.products.contains_key(&product_id) {
            return Err(LedgerStoreError::not_found("product", product_id));
        }
        Ok(state
            .product_batches(product_id)
            .iter()
            .map(|batch| state.ledger(batch))
            .collect())
    }

    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<Movement>> {
        let state = self.state.read().await;
        state.check_available()?;

        let movements = state
            .movements
            .iter()
            .filter(|m| query.matches(m))
            .filter(|m| match query.product_id {
                Some(product_id) => state
                    .batches
                    .get(&m.batch_id)
                    .is_some_and(|b| b.product_id == product_id),
                None => true,
            })
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(movements)
    }

    async fn stream_movements(&self) -> Result<MovementStream> {
        use futures_util::stream;

        let state = self.state.read().await;
        state.check_available()?;
        let movements = state.movements.clone();

        let stream = stream::iter(movements.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        state.check_available()?;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn commit_order(&self, commit: OrderCommit) -> Result<Order> {
        commit.validate()?;
        let expected = dedup_expected_versions(&commit.expected_versions)?;

        let mut state = self.state.write().await;
        state.check_available()?;

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            let (batch_id, version) = expected.first().copied().unwrap_or_default();
            return Err(LedgerStoreError::ConcurrencyConflict {
                entity: "batch",
                id: batch_id.to_string(),
                expected: version,
                actual: version.next(),
            });
        }

        if state.orders.contains_key(&commit.order_id) {
            return Err(LedgerStoreError::InvalidRecord(format!(
                "order {} already exists",
                commit.order_id
            )));
        }

        // Verify every version before writing anything.
        for (batch_id, version) in &expected {
            let batch = state
                .batches
                .get(batch_id)
                .ok_or_else(|| LedgerStoreError::not_found("batch", batch_id))?;
            if batch.version != *version {
                return Err(LedgerStoreError::ConcurrencyConflict {
                    entity: "batch",
                    id: batch_id.to_string(),
                    expected: *version,
                    actual: batch.version,
                });
            }
        }

        let order = Order {
            id: commit.order_id,
            status: OrderStatus::Processing,
            lines: commit.lines,
            cod_amount: commit.cod_amount,
            version: Version::first(),
            created_by: commit.created_by.clone(),
            updated_by: commit.created_by.clone(),
            created_at: commit.created_at,
            updated_at: commit.created_at,
        };
        state.orders.insert(order.id, order.clone());

        for deduction in commit.deductions {
            state.append(Movement {
                id: MovementId::new(),
                sequence: 0,
                batch_id: deduction.batch_id,
                kind: MovementKind::Sale,
                quantity_changed: -deduction.quantity,
                order_id: Some(order.id),
                created_at: commit.created_at,
                recorded_by: commit.created_by.clone(),
            });
        }

        for (batch_id, _) in &expected {
            if let Some(batch) = state.batches.get_mut(batch_id) {
                batch.version = batch.version.next();
            }
        }

        Ok(order)
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        expected: Version,
        status: OrderStatus,
        actor: &ActorId,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| LedgerStoreError::not_found("order", order_id))?;

        if order.version != expected {
            return Err(LedgerStoreError::ConcurrencyConflict {
                entity: "order",
                id: order_id.to_string(),
                expected,
                actual: order.version,
            });
        }

        order.status = status;
        order.version = order.version.next();
        order.updated_by = actor.clone();
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewMovement, OrderLine};
    use chrono::{DateTime, Duration};
    use futures_util::StreamExt;

    async fn product(store: &InMemoryLedgerStore, sku: &str) -> Product {
        store
            .insert_product(NewProduct::new(sku, "Widget", 2))
            .await
            .unwrap()
    }

    fn stock_in(product_id: ProductId, quantity: i64, received_at: DateTime<Utc>) -> NewBatch {
        NewBatch {
            product_id,
            lot_number: "LOT-1".into(),
            quantity,
            unit_cost: Money::from_cents(150),
            received_at,
            received_by: ActorId::new("receiver"),
        }
    }

    fn commit_for(batch: &Batch, quantity: i64) -> OrderCommit {
        OrderCommit {
            order_id: OrderId::new(),
            lines: vec![OrderLine::new(batch.product_id, quantity)],
            cod_amount: Money::from_cents(1000),
            created_by: ActorId::new("clerk"),
            created_at: Utc::now(),
            deductions: vec![NewMovement {
                batch_id: batch.id,
                quantity,
            }],
            expected_versions: vec![(batch.id, batch.version)],
        }
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let store = InMemoryLedgerStore::new();
        product(&store, "SKU-1").await;

        let result = store.insert_product(NewProduct::new("SKU-1", "Other", 0)).await;
        assert!(matches!(result, Err(LedgerStoreError::DuplicateSku(sku)) if sku == "SKU-1"));
    }

    #[tokio::test]
    async fn receive_batch_writes_in_movement() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;

        let (batch, movement) = store
            .receive_batch(stock_in(product.id, 10, Utc::now()))
            .await
            .unwrap();

        assert_eq!(movement.kind, MovementKind::In);
        assert_eq!(movement.quantity_changed, 10);
        assert_eq!(movement.batch_id, batch.id);
        assert_eq!(movement.sequence, 1);
        assert_eq!(batch.version, Version::initial());
    }

    #[tokio::test]
    async fn receive_batch_for_unknown_product_fails() {
        let store = InMemoryLedgerStore::new();
        let result = store
            .receive_batch(stock_in(ProductId::new(), 10, Utc::now()))
            .await;
        assert!(matches!(result, Err(LedgerStoreError::NotFound { entity: "product", .. })));
        assert_eq!(store.movement_count().await, 0);
    }

    #[tokio::test]
    async fn batches_are_ordered_oldest_first() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        let now = Utc::now();

        let (newer, _) = store.receive_batch(stock_in(product.id, 1, now)).await.unwrap();
        let (older, _) = store
            .receive_batch(stock_in(product.id, 1, now - Duration::days(1)))
            .await
            .unwrap();

        let batches = store.batches_for_product(product.id).await.unwrap();
        assert_eq!(batches[0].id, older.id);
        assert_eq!(batches[1].id, newer.id);
    }

    #[tokio::test]
    async fn commit_writes_sale_movements_and_bumps_version() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        let (batch, _) = store.receive_batch(stock_in(product.id, 10, Utc::now())).await.unwrap();

        let order = store.commit_order(commit_for(&batch, 4)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Processing);

        let ledger = store.batch_ledger(batch.id).await.unwrap();
        assert_eq!(ledger.batch.version, Version::first());
        assert_eq!(ledger.entries.len(), 2);
        let sale = &ledger.entries[1];
        assert_eq!(sale.movement.quantity_changed, -4);
        assert_eq!(sale.movement.order_id, Some(order.id));
        assert_eq!(sale.order_status, Some(OrderStatus::Processing));
    }

    #[tokio::test]
    async fn stale_version_conflicts_and_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        let (batch, _) = store.receive_batch(stock_in(product.id, 10, Utc::now())).await.unwrap();

        store.commit_order(commit_for(&batch, 2)).await.unwrap();
        let result = store.commit_order(commit_for(&batch, 2)).await;

        assert!(matches!(
            result,
            Err(LedgerStoreError::ConcurrencyConflict { entity: "batch", .. })
        ));
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.movement_count().await, 2);
    }

    #[tokio::test]
    async fn status_update_is_visible_in_ledger_join() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        let (batch, _) = store.receive_batch(stock_in(product.id, 10, Utc::now())).await.unwrap();
        let order = store.commit_order(commit_for(&batch, 3)).await.unwrap();

        let updated = store
            .update_order_status(order.id, order.version, OrderStatus::Cancelled, &ActorId::anonymous())
            .await
            .unwrap();
        assert_eq!(updated.version, Version::new(2));

        let ledger = store.batch_ledger(batch.id).await.unwrap();
        assert_eq!(ledger.entries[1].order_status, Some(OrderStatus::Cancelled));
        assert_eq!(store.movement_count().await, 2);
    }

    #[tokio::test]
    async fn status_update_with_stale_version_conflicts() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        let (batch, _) = store.receive_batch(stock_in(product.id, 10, Utc::now())).await.unwrap();
        let order = store.commit_order(commit_for(&batch, 3)).await.unwrap();
        let actor = ActorId::anonymous();

        store
            .update_order_status(order.id, order.version, OrderStatus::Sent, &actor)
            .await
            .unwrap();
        let result = store
            .update_order_status(order.id, order.version, OrderStatus::Cancelled, &actor)
            .await;

        assert!(matches!(
            result,
            Err(LedgerStoreError::ConcurrencyConflict { entity: "order", .. })
        ));
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Sent);
    }

    #[tokio::test]
    async fn cost_correction_leaves_version_alone() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        let (batch, _) = store.receive_batch(stock_in(product.id, 10, Utc::now())).await.unwrap();

        let (updated, previous) = store
            .update_batch_cost(batch.id, Money::from_cents(999))
            .await
            .unwrap();
        assert_eq!(updated.unit_cost.cents(), 999);
        assert_eq!(previous, batch.unit_cost);
        assert_eq!(updated.version, batch.version);
        assert_eq!(store.movement_count().await, 1);
    }

    #[tokio::test]
    async fn query_movements_filters_by_product_and_pages() {
        let store = InMemoryLedgerStore::new();
        let a = product(&store, "SKU-A").await;
        let b = product(&store, "SKU-B").await;
        for _ in 0..3 {
            store.receive_batch(stock_in(a.id, 1, Utc::now())).await.unwrap();
        }
        store.receive_batch(stock_in(b.id, 1, Utc::now())).await.unwrap();

        let all_a = store
            .query_movements(MovementQuery::new().product_id(a.id))
            .await
            .unwrap();
        assert_eq!(all_a.len(), 3);

        let page = store
            .query_movements(MovementQuery::new().offset(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sequence, 2);
    }

    #[tokio::test]
    async fn stream_yields_log_in_sequence_order() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        for qty in 1..=3 {
            store.receive_batch(stock_in(product.id, qty, Utc::now())).await.unwrap();
        }

        let sequences: Vec<i64> = store
            .stream_movements()
            .await
            .unwrap()
            .map(|m| m.unwrap().sequence)
            .collect()
            .await;
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = InMemoryLedgerStore::new();
        let product = product(&store, "SKU-1").await;
        let (batch, _) = store.receive_batch(stock_in(product.id, 10, Utc::now())).await.unwrap();

        store.inject_commit_conflicts(1).await;
        assert!(store.commit_order(commit_for(&batch, 1)).await.is_err());
        assert!(store.commit_order(commit_for(&batch, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_store_fails_reads() {
        let store = InMemoryLedgerStore::new();
        store.set_unavailable(true).await;
        assert!(matches!(
            store.list_products().await,
            Err(LedgerStoreError::Unavailable(_))
        ));
    }
}

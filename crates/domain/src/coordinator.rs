//! Allocation transaction coordinator.
//!
//! Turns an order draft into an order plus its sale movements. Every attempt
//! re-plans all lines against the live ledger and hands the plan to the store
//! together with the batch versions it was computed from; the store refuses
//! the write if any of those batches moved in the meantime.

use std::time::{Duration, Instant};

use chrono::Utc;
use common::{ActorId, Money, OrderId};
use ledger_store::{LedgerStore, NewMovement, OrderCommit, OrderLine};
use serde::{Deserialize, Serialize};

use crate::allocator::{AllocationPlan, FifoAllocator, HeldQuantities};
use crate::error::{Result, StockError};

/// Bounded retry for optimistic-concurrency conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further one.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// A policy that never waits between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10))
    }
}

/// An order not yet committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub cod_amount: Money,
}

impl OrderDraft {
    pub fn new(lines: Vec<OrderLine>, cod_amount: Money) -> Self {
        Self { lines, cod_amount }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(StockError::InvalidArgument(
                "order must have at least one line".into(),
            ));
        }
        if let Some(line) = self.lines.iter().find(|line| line.quantity <= 0) {
            return Err(StockError::InvalidArgument(format!(
                "line quantity must be positive, got {} for product {}",
                line.quantity, line.product_id
            )));
        }
        if self.cod_amount.is_negative() {
            return Err(StockError::InvalidArgument(
                "COD amount must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Commits order drafts against a ledger store.
pub struct AllocationCoordinator<S: LedgerStore> {
    store: S,
    allocator: FifoAllocator<S>,
    retry: RetryPolicy,
}

impl<S: LedgerStore + Clone> AllocationCoordinator<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        let allocator = FifoAllocator::new(store.clone());
        Self {
            store,
            allocator,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Plans every line of a draft without writing anything.
    ///
    /// Lines are planned in order; a product that appears on several lines
    /// only sees what earlier lines left over.
    pub async fn plan_order(&self, draft: &OrderDraft) -> Result<Vec<AllocationPlan>> {
        let mut held = HeldQuantities::new();
        let mut plans = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let plan = self
                .allocator
                .plan_with_held(line.product_id, line.quantity, &held)
                .await?;
            held.hold(&plan);
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Creates the order and debits its stock, all or nothing.
    ///
    /// Retries the whole plan-then-write cycle on a version conflict, up to
    /// the retry policy's limit. Business rejections are returned at once.
    #[tracing::instrument(skip(self, draft), fields(lines = draft.lines.len()))]
    pub async fn commit(&self, draft: OrderDraft, actor: &ActorId) -> Result<OrderId> {
        draft.validate()?;
        let started = Instant::now();
        let order_id = OrderId::new();

        let mut attempt = 0;
        loop {
            attempt += 1;

            let plans = match self.plan_order(&draft).await {
                Ok(plans) => plans,
                Err(err) => {
                    if matches!(err, StockError::InsufficientStock { .. }) {
                        metrics::counter!("allocation_rejections_total").increment(1);
                        tracing::info!(%order_id, error = %err, "allocation rejected");
                    }
                    return Err(err);
                }
            };

            let commit = build_commit(order_id, &draft, &plans, actor);
            match self.store.commit_order(commit).await {
                Ok(order) => {
                    metrics::counter!("allocation_commits_total").increment(1);
                    metrics::histogram!("allocation_commit_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::info!(order_id = %order.id, attempt, "order committed");
                    return Ok(order.id);
                }
                Err(err) if err.is_conflict() => {
                    metrics::counter!("allocation_conflicts_total").increment(1);
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(%order_id, attempt, "giving up after repeated conflicts");
                        return Err(StockError::Conflict { attempts: attempt });
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(%order_id, attempt, ?delay, error = %err, "commit conflicted, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn build_commit(
    order_id: OrderId,
    draft: &OrderDraft,
    plans: &[AllocationPlan],
    actor: &ActorId,
) -> OrderCommit {
    let deductions = plans
        .iter()
        .flat_map(|plan| &plan.deductions)
        .map(|d| NewMovement {
            batch_id: d.batch_id,
            quantity: d.quantity,
        })
        .collect();
    let expected_versions = plans
        .iter()
        .flat_map(|plan| &plan.deductions)
        .map(|d| (d.batch_id, d.batch_version))
        .collect();

    OrderCommit {
        order_id,
        lines: draft.lines.clone(),
        cod_amount: draft.cod_amount,
        created_by: actor.clone(),
        created_at: Utc::now(),
        deductions,
        expected_versions,
    }
}

#[cfg(test)]
mod tests {
    use common::ProductId;
    use ledger_store::{InMemoryLedgerStore, LedgerStoreExt, NewBatch, NewProduct, Product};

    use super::*;
    use crate::availability::AvailabilityCalculator;

    async fn stocked_product(store: &InMemoryLedgerStore, sku: &str, quantity: i64) -> Product {
        let product = store
            .insert_product(NewProduct::new(sku, sku, 0))
            .await
            .unwrap();
        store
            .receive_batch(NewBatch {
                product_id: product.id,
                lot_number: format!("{sku}-1"),
                quantity,
                unit_cost: Money::from_cents(100),
                received_at: Utc::now(),
                received_by: ActorId::system(),
            })
            .await
            .unwrap();
        product
    }

    fn draft(lines: &[(ProductId, i64)]) -> OrderDraft {
        OrderDraft::new(
            lines
                .iter()
                .map(|(product_id, quantity)| OrderLine::new(*product_id, *quantity))
                .collect(),
            Money::from_cents(1500),
        )
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn policy_always_allows_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[test]
    fn draft_validation() {
        let product = ProductId::new();
        assert!(draft(&[]).validate().is_err());
        assert!(draft(&[(product, 0)]).validate().is_err());
        assert!(draft(&[(product, 2)]).validate().is_ok());

        let mut negative_cod = draft(&[(product, 2)]);
        negative_cod.cod_amount = Money::from_cents(-1);
        assert!(negative_cod.validate().is_err());
    }

    #[tokio::test]
    async fn commit_writes_order_and_sales() {
        let store = InMemoryLedgerStore::new();
        let product = stocked_product(&store, "A", 10).await;
        let coordinator = AllocationCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        let order_id = coordinator
            .commit(draft(&[(product.id, 4)]), &ActorId::new("clerk"))
            .await
            .unwrap();

        let order = store.require_order(order_id).await.unwrap();
        assert_eq!(order.created_by, ActorId::new("clerk"));
        let sales = store.movements_for_order(order_id).await.unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].quantity_changed, -4);

        let calculator = AvailabilityCalculator::new(store);
        assert_eq!(calculator.available_for_product(product.id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn repeated_product_lines_share_availability() {
        let store = InMemoryLedgerStore::new();
        let product = stocked_product(&store, "A", 5).await;
        let coordinator = AllocationCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        let result = coordinator
            .commit(draft(&[(product.id, 3), (product.id, 3)]), &ActorId::anonymous())
            .await;
        assert!(matches!(
            result,
            Err(StockError::InsufficientStock { available: 2, shortfall: 1, .. })
        ));
        assert_eq!(store.order_count().await, 0);

        coordinator
            .commit(draft(&[(product.id, 3), (product.id, 2)]), &ActorId::anonymous())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_through_transient_conflicts() {
        let store = InMemoryLedgerStore::new();
        let product = stocked_product(&store, "A", 10).await;
        let coordinator = AllocationCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        store.inject_commit_conflicts(2).await;
        coordinator
            .commit(draft(&[(product.id, 1)]), &ActorId::anonymous())
            .await
            .unwrap();
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn surfaces_conflict_when_retries_run_out() {
        let store = InMemoryLedgerStore::new();
        let product = stocked_product(&store, "A", 10).await;
        let coordinator = AllocationCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        store.inject_commit_conflicts(5).await;
        let result = coordinator
            .commit(draft(&[(product.id, 1)]), &ActorId::anonymous())
            .await;

        assert!(matches!(result, Err(StockError::Conflict { attempts: 3 })));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.movement_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let coordinator = AllocationCoordinator::new(store, RetryPolicy::immediate(3));

        let result = coordinator
            .commit(draft(&[(ProductId::new(), 1)]), &ActorId::anonymous())
            .await;
        assert!(matches!(result, Err(StockError::NotFound { entity: "product", .. })));
    }

    #[tokio::test]
    async fn unavailable_store_is_not_retried() {
        let store = InMemoryLedgerStore::new();
        let product = stocked_product(&store, "A", 10).await;
        let coordinator = AllocationCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        store.set_unavailable(true).await;
        let result = coordinator
            .commit(draft(&[(product.id, 1)]), &ActorId::anonymous())
            .await;
        assert!(matches!(result, Err(StockError::Unavailable(_))));
    }
}

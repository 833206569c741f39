//! Order status transitions.

use common::{ActorId, OrderId, OrderStatus};
use ledger_store::{LedgerStore, LedgerStoreExt, Order};

use crate::coordinator::RetryPolicy;
use crate::error::{Result, StockError};

/// Moves orders along the status graph.
///
/// A transition rewrites only the order's status. Its effect on stock
/// follows from [`OrderStatus::is_consuming`] the next time availability is
/// computed.
pub struct OrderLifecycle<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: LedgerStore> OrderLifecycle<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Transitions an order to `next`.
    ///
    /// The edge is validated against the freshly loaded order. If another
    /// writer changes the order first, it is reloaded and the edge checked
    /// again.
    #[tracing::instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: OrderId,
        next: OrderStatus,
        actor: &ActorId,
    ) -> Result<Order> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let order = self.store.require_order(order_id).await?;

            if !order.status.can_transition_to(next) {
                return Err(StockError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to: next,
                });
            }

            match self
                .store
                .update_order_status(order_id, order.version, next, actor)
                .await
            {
                Ok(updated) => {
                    metrics::counter!(
                        "order_transitions_total",
                        "from" => order.status.as_str(),
                        "to" => next.as_str()
                    )
                    .increment(1);
                    tracing::info!(
                        %order_id,
                        from = %order.status,
                        to = %next,
                        releases_stock = order.status.is_consuming() && !next.is_consuming(),
                        "order status changed"
                    );
                    return Ok(updated);
                }
                Err(err) if err.is_conflict() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(StockError::Conflict { attempts: attempt });
                    }
                    tracing::debug!(%order_id, attempt, "status update conflicted, reloading");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Like [`transition`](Self::transition) with the target given by name.
    pub async fn transition_named(
        &self,
        order_id: OrderId,
        next: &str,
        actor: &ActorId,
    ) -> Result<Order> {
        let next: OrderStatus = next
            .parse()
            .map_err(|e: common::ParseStatusError| StockError::InvalidArgument(e.to_string()))?;
        self.transition(order_id, next, actor).await
    }
}

//! Periodic ledger audit.
//!
//! Walks the whole movement log and checks the invariants a correct ledger
//! always satisfies. Violations are reported, never repaired: movements are
//! immutable and a fix needs a human decision.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{BatchId, MovementId, OrderId, OrderStatus};
use domain::ProductStock;
use futures_util::StreamExt;
use ledger_store::{LedgerStore, MovementKind};
use serde::Serialize;

use crate::Result;
use crate::views::StockLevelsView;

/// One invariant violation found in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// An `in` movement with a zero or negative quantity.
    NonPositiveReceipt { movement_id: MovementId, quantity: i64 },
    /// A `sale` movement with a zero or positive quantity.
    NonNegativeSale { movement_id: MovementId, quantity: i64 },
    /// A `sale` movement without an order reference.
    SaleWithoutOrder { movement_id: MovementId },
    /// A `sale` movement referencing an order that does not exist.
    UnknownOrder { movement_id: MovementId, order_id: OrderId },
    /// A movement referencing a batch that does not exist.
    UnknownBatch { movement_id: MovementId, batch_id: BatchId },
    /// More units consumed than received under current order statuses.
    Oversold { batch_id: BatchId, received: i64, consumed: i64 },
}

/// A cached batch figure that no longer matches the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleEntry {
    pub batch_id: BatchId,
    pub cached: Option<i64>,
    pub actual: i64,
}

/// Outcome of one audit pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub audited_at: DateTime<Utc>,
    pub movements_checked: u64,
    pub batches_checked: u64,
    pub discrepancies: Vec<Discrepancy>,
    /// Differences between the view before this audit and the ledger. Only
    /// filled when the view had been refreshed before.
    pub stale_entries: Vec<StaleEntry>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Audits the ledger and keeps a [`StockLevelsView`] fresh.
pub struct Reconciler<S> {
    store: S,
    view: StockLevelsView,
}

impl<S: LedgerStore> Reconciler<S> {
    pub fn new(store: S, view: StockLevelsView) -> Self {
        Self { store, view }
    }

    pub fn view(&self) -> &StockLevelsView {
        &self.view
    }

    /// Runs one full audit, then refreshes the view.
    #[tracing::instrument(skip(self))]
    pub async fn audit(&self) -> Result<AuditReport> {
        let mut discrepancies = Vec::new();
        let mut movements_checked = 0;
        let mut known_batches: HashSet<BatchId> = HashSet::new();
        let mut missing_batches: HashSet<BatchId> = HashSet::new();
        let mut order_statuses: HashMap<OrderId, Option<OrderStatus>> = HashMap::new();

        let mut stream = self.store.stream_movements().await?;
        while let Some(result) = stream.next().await {
            let movement = result?;
            movements_checked += 1;

            if !known_batches.contains(&movement.batch_id)
                && !missing_batches.contains(&movement.batch_id)
            {
                if self.store.get_batch(movement.batch_id).await?.is_some() {
                    known_batches.insert(movement.batch_id);
                } else {
                    missing_batches.insert(movement.batch_id);
                }
            }
            if missing_batches.contains(&movement.batch_id) {
                discrepancies.push(Discrepancy::UnknownBatch {
                    movement_id: movement.id,
                    batch_id: movement.batch_id,
                });
            }

            match movement.kind {
                MovementKind::In => {
                    if movement.quantity_changed <= 0 {
                        discrepancies.push(Discrepancy::NonPositiveReceipt {
                            movement_id: movement.id,
                            quantity: movement.quantity_changed,
                        });
                    }
                }
                MovementKind::Sale => {
                    if movement.quantity_changed >= 0 {
                        discrepancies.push(Discrepancy::NonNegativeSale {
                            movement_id: movement.id,
                            quantity: movement.quantity_changed,
                        });
                    }
                    let Some(order_id) = movement.order_id else {
                        discrepancies.push(Discrepancy::SaleWithoutOrder {
                            movement_id: movement.id,
                        });
                        continue;
                    };
                    let status = match order_statuses.get(&order_id) {
                        Some(status) => *status,
                        None => {
                            let status = self.store.get_order(order_id).await?.map(|o| o.status);
                            order_statuses.insert(order_id, status);
                            status
                        }
                    };
                    if status.is_none() {
                        discrepancies.push(Discrepancy::UnknownOrder {
                            movement_id: movement.id,
                            order_id,
                        });
                    }
                }
            }
        }

        let cached = if self.view.refreshed_at().await.is_some() {
            Some(self.view.batch_remaining().await)
        } else {
            None
        };
        let mut stale_entries = Vec::new();
        let mut batches_checked = 0;
        for product in self.store.list_products().await? {
            let ledgers = self.store.product_ledger(product.id).await?;
            let stock = ProductStock::from_ledgers(product.id, &ledgers);
            for batch in &stock.batches {
                batches_checked += 1;
                if batch.figures.net() < 0 {
                    discrepancies.push(Discrepancy::Oversold {
                        batch_id: batch.batch.id,
                        received: batch.figures.received,
                        consumed: batch.figures.consumed,
                    });
                }
                if let Some(cached) = &cached
                    && cached.get(&batch.batch.id).copied() != Some(batch.remaining)
                {
                    stale_entries.push(StaleEntry {
                        batch_id: batch.batch.id,
                        cached: cached.get(&batch.batch.id).copied(),
                        actual: batch.remaining,
                    });
                }
            }
        }

        self.view.refresh(&self.store).await?;

        metrics::gauge!("ledger_audit_discrepancies").set(discrepancies.len() as f64);
        if discrepancies.is_empty() {
            tracing::info!(
                movements_checked,
                batches_checked,
                stale = stale_entries.len(),
                "ledger audit clean"
            );
        } else {
            tracing::warn!(
                movements_checked,
                batches_checked,
                discrepancies = discrepancies.len(),
                "ledger audit found discrepancies"
            );
        }

        Ok(AuditReport {
            audited_at: Utc::now(),
            movements_checked,
            batches_checked,
            discrepancies,
            stale_entries,
        })
    }

    /// Audits every `interval` until `shutdown` completes. A failed pass is
    /// logged and the loop carries on.
    pub async fn run<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("reconciler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.audit().await {
                        tracing::error!(error = %err, "ledger audit failed");
                    }
                }
            }
        }
    }
}

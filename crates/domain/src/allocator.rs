//! FIFO allocation planning.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{BatchId, ProductId};
use ledger_store::{BatchLedger, LedgerStore, Version};
use serde::{Deserialize, Serialize};

use crate::availability::summarize;
use crate::error::{Result, StockError};

/// One planned debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub batch_id: BatchId,
    pub quantity: i64,
    /// Version the batch had when its availability was read.
    pub batch_version: Version,
}

/// Deductions satisfying one product line, oldest batch first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub product_id: ProductId,
    pub requested: i64,
    pub deductions: Vec<Deduction>,
}

impl AllocationPlan {
    pub fn is_empty(&self) -> bool {
        self.deductions.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.deductions.iter().map(|d| d.quantity).sum()
    }
}

/// A batch as seen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCandidate {
    pub batch_id: BatchId,
    pub received_at: DateTime<Utc>,
    pub available: i64,
    pub version: Version,
}

impl BatchCandidate {
    pub fn from_ledger(ledger: &BatchLedger) -> Self {
        Self {
            batch_id: ledger.batch.id,
            received_at: ledger.batch.received_at,
            available: summarize(ledger).remaining(),
            version: ledger.batch.version,
        }
    }
}

/// Units already promised to earlier lines of the same draft.
#[derive(Debug, Clone, Default)]
pub struct HeldQuantities {
    held: HashMap<BatchId, i64>,
}

impl HeldQuantities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, batch_id: BatchId) -> i64 {
        self.held.get(&batch_id).copied().unwrap_or(0)
    }

    /// Records every deduction of `plan` as held.
    pub fn hold(&mut self, plan: &AllocationPlan) {
        for deduction in &plan.deductions {
            let held = self.held.entry(deduction.batch_id).or_insert(0);
            *held = held.saturating_add(deduction.quantity);
        }
    }
}

/// Plans `requested` units of `product_id` over `candidates`, oldest first.
///
/// All-or-nothing: if the candidates cannot cover the request no plan is
/// returned, only the shortfall.
pub fn plan_fifo(
    product_id: ProductId,
    requested: i64,
    candidates: &[BatchCandidate],
    held: &HeldQuantities,
) -> Result<AllocationPlan> {
    if requested < 0 {
        return Err(StockError::InvalidArgument(format!(
            "requested quantity must not be negative, got {requested}"
        )));
    }

    let mut ordered: Vec<&BatchCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then(a.batch_id.cmp(&b.batch_id))
    });

    let mut outstanding = requested;
    let mut deductions = Vec::new();
    for candidate in &ordered {
        if outstanding == 0 {
            break;
        }
        let free = (candidate.available - held.get(candidate.batch_id)).max(0);
        let take = free.min(outstanding);
        if take > 0 {
            deductions.push(Deduction {
                batch_id: candidate.batch_id,
                quantity: take,
                batch_version: candidate.version,
            });
            outstanding -= take;
        }
    }

    if outstanding > 0 {
        let available = requested - outstanding;
        return Err(StockError::InsufficientStock {
            product_id,
            requested,
            available,
            shortfall: outstanding,
        });
    }

    Ok(AllocationPlan {
        product_id,
        requested,
        deductions,
    })
}

/// Plans allocations against the live ledger.
#[derive(Debug, Clone)]
pub struct FifoAllocator<S> {
    store: S,
}

impl<S: LedgerStore> FifoAllocator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Plans one product line. Nothing is written.
    #[tracing::instrument(skip(self))]
    pub async fn plan(&self, product_id: ProductId, requested: i64) -> Result<AllocationPlan> {
        self.plan_with_held(product_id, requested, &HeldQuantities::new())
            .await
    }

    /// Plans one product line on top of quantities already held by other
    /// lines of the same draft.
    pub async fn plan_with_held(
        &self,
        product_id: ProductId,
        requested: i64,
        held: &HeldQuantities,
    ) -> Result<AllocationPlan> {
        if requested < 0 {
            return Err(StockError::InvalidArgument(format!(
                "requested quantity must not be negative, got {requested}"
            )));
        }
        let ledgers = self.store.product_ledger(product_id).await?;
        let candidates: Vec<BatchCandidate> =
            ledgers.iter().map(BatchCandidate::from_ledger).collect();
        let plan = plan_fifo(product_id, requested, &candidates, held)?;
        tracing::debug!(
            batches = plan.deductions.len(),
            total = plan.total(),
            "allocation planned"
        );
        Ok(plan)
    }
}

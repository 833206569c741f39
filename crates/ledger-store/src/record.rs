use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActorId, BatchId, LedgerStoreError, Money, MovementId, OrderId, OrderStatus, ProductId};

/// Version number of a mutable record, used for optimistic concurrency control.
///
/// A batch's version is bumped every time a sale movement is written against
/// it; an order's version is bumped on every status change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a record nobody has written to yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    /// Unique business key.
    pub sku: String,
    pub name: String,
    /// Remaining stock at or below this level raises a low-stock alert.
    pub min_stock_alert: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub min_stock_alert: i64,
}

impl NewProduct {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, min_stock_alert: i64) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            min_stock_alert,
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.sku.trim().is_empty() {
            return Err(LedgerStoreError::InvalidRecord("SKU must not be empty".into()));
        }
        if self.min_stock_alert < 0 {
            return Err(LedgerStoreError::InvalidRecord(
                "minimum stock alert must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// One receipt of a product ("lot").
///
/// Available quantity is never stored on the batch; it is derived from the
/// movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub product_id: ProductId,
    /// Human label, not guaranteed unique.
    pub lot_number: String,
    /// Zero means the cost has not been entered yet.
    pub unit_cost: Money,
    pub received_at: DateTime<Utc>,
    pub version: Version,
}

/// Input for a stock-in: a new batch plus its quantity received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub product_id: ProductId,
    pub lot_number: String,
    pub quantity: i64,
    pub unit_cost: Money,
    pub received_at: DateTime<Utc>,
    pub received_by: ActorId,
}

impl NewBatch {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.quantity <= 0 {
            return Err(LedgerStoreError::InvalidRecord(format!(
                "received quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.unit_cost.is_negative() {
            return Err(LedgerStoreError::InvalidRecord(
                "unit cost must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Kind of a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Stock received into a batch.
    In,
    /// Stock debited from a batch for an order line.
    Sale,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Sale => "sale",
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = LedgerStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementKind::In),
            "sale" => Ok(MovementKind::Sale),
            other => Err(LedgerStoreError::InvalidRecord(format!(
                "unknown movement kind: {other}"
            ))),
        }
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Store-assigned position in the log; totally orders all movements.
    pub sequence: i64,
    pub batch_id: BatchId,
    pub kind: MovementKind,
    /// Signed delta: positive for `in`, negative for `sale`.
    pub quantity_changed: i64,
    /// Set for `sale` movements only.
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub recorded_by: ActorId,
}

impl Movement {
    /// Absolute number of units moved.
    pub fn units(&self) -> i64 {
        self.quantity_changed.abs()
    }
}

/// A planned debit of `quantity` units from one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub batch_id: BatchId,
    pub quantity: i64,
}

/// One product/quantity pair of an order. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A customer order. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    /// Collect-on-delivery amount.
    pub cod_amount: Money,
    pub version: Version,
    pub created_by: ActorId,
    /// Actor of the most recent status change.
    pub updated_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything written by one allocation commit.
///
/// `expected_versions` holds the version every touched batch had when the
/// deductions were planned. The commit fails with a conflict if any of them
/// moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCommit {
    pub order_id: OrderId,
    pub lines: Vec<OrderLine>,
    pub cod_amount: Money,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub deductions: Vec<NewMovement>,
    pub expected_versions: Vec<(BatchId, Version)>,
}

impl OrderCommit {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.lines.is_empty() {
            return Err(LedgerStoreError::InvalidRecord("order has no lines".into()));
        }
        for deduction in &self.deductions {
            if deduction.quantity <= 0 {
                return Err(LedgerStoreError::InvalidRecord(format!(
                    "deduction from batch {} must be positive, got {}",
                    deduction.batch_id, deduction.quantity
                )));
            }
            if !self
                .expected_versions
                .iter()
                .any(|(id, _)| *id == deduction.batch_id)
            {
                return Err(LedgerStoreError::InvalidRecord(format!(
                    "no expected version for batch {}",
                    deduction.batch_id
                )));
            }
        }
        Ok(())
    }
}

/// A movement joined with the current status of the order it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub movement: Movement,
    /// Read at query time; `None` for `in` movements.
    pub order_status: Option<OrderStatus>,
}

/// A batch together with its movement history in sequence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLedger {
    pub batch: Batch,
    pub entries: Vec<LedgerEntry>,
}

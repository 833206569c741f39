use chrono::{DateTime, Utc};

use crate::{BatchId, Movement, MovementKind, OrderId, ProductId};

/// Builder for filtering the movement log.
///
/// Results are always returned in sequence order.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    /// Filter by batch.
    pub batch_id: Option<BatchId>,

    /// Filter by the product owning the batch.
    pub product_id: Option<ProductId>,

    /// Filter by referenced order.
    pub order_id: Option<OrderId>,

    /// Filter by movement kind.
    pub kind: Option<MovementKind>,

    /// Movements created at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Movements created at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of movements to return.
    pub limit: Option<usize>,

    /// Number of movements to skip.
    pub offset: Option<usize>,
}

impl MovementQuery {
    /// Creates a new empty query matching every movement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one batch.
    pub fn for_batch(batch_id: BatchId) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Default::default()
        }
    }

    /// Creates a query for the sale movements of one order.
    pub fn for_order(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            kind: Some(MovementKind::Sale),
            ..Default::default()
        }
    }

    /// Filters by product.
    pub fn product_id(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    /// Filters by movement kind.
    pub fn kind(mut self, kind: MovementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Filters to movements created at or after this time.
    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    /// Filters to movements created at or before this time.
    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Checks the movement-local filters. The product filter needs the batch
    /// registry and is applied by the store.
    pub(crate) fn matches(&self, movement: &Movement) -> bool {
        if let Some(id) = self.batch_id
            && movement.batch_id != id
        {
            return false;
        }
        if let Some(id) = self.order_id
            && movement.order_id != Some(id)
        {
            return false;
        }
        if let Some(kind) = self.kind
            && movement.kind != kind
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && movement.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && movement.created_at > to
        {
            return false;
        }
        true
    }
}

//! Stock ledger core.
//!
//! This crate derives stock from the movement log and allocates it:
//! - [`AvailabilityCalculator`] recomputes availability from movements and
//!   current order statuses
//! - [`FifoAllocator`] plans deductions oldest batch first
//! - [`AllocationCoordinator`] commits plans with optimistic concurrency
//! - [`OrderLifecycle`] drives order status transitions
//! - [`InventoryLedger`] bundles all of the above over one store

pub mod allocator;
pub mod availability;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod report;

pub use allocator::{AllocationPlan, BatchCandidate, Deduction, FifoAllocator, HeldQuantities, plan_fifo};
pub use availability::{AvailabilityCalculator, BatchStock, ProductStock, StockFigures, summarize};
pub use coordinator::{AllocationCoordinator, OrderDraft, RetryPolicy};
pub use error::{Result, StockError};
pub use ledger::{InventoryLedger, OrderDetail};
pub use lifecycle::OrderLifecycle;
pub use registry::{BatchRegistry, StockIn};
pub use report::{BatchReport, InventoryReport, ProductReport};

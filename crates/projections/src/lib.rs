//! Read side of the stock ledger.
//!
//! This crate provides views derived from the movement log:
//! - [`StockLevelsView`], a materialized per-batch stock cache rebuilt wholesale
//! - [`Reconciler`], the periodic audit of ledger invariants
//! - [`ReadModel`] trait for query access to derived data

pub mod error;
pub mod read_model;
pub mod reconciler;
pub mod views;

pub use error::{ProjectionError, Result};
pub use read_model::ReadModel;
pub use reconciler::{AuditReport, Discrepancy, Reconciler, StaleEntry};
pub use views::{ProductLevel, RefreshSummary, StockLevelsView};

//! Inventory reporting and audit endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::ProductReport;
use ledger_store::LedgerStore;
use projections::AuditReport;

use crate::AppState;
use crate::error::ApiError;

/// GET /reports/inventory: every product with its per-batch breakdown.
#[tracing::instrument(skip(state))]
pub async fn inventory<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductReport>>, ApiError> {
    Ok(Json(state.ledger.inventory().await?))
}

/// GET /reports/low-stock: products at or below their alert threshold.
#[tracing::instrument(skip(state))]
pub async fn low_stock<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductReport>>, ApiError> {
    Ok(Json(state.ledger.low_stock().await?))
}

/// GET /reports/audit: runs a ledger audit now.
#[tracing::instrument(skip(state))]
pub async fn audit<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<AuditReport>, ApiError> {
    Ok(Json(state.reconciler.audit().await?))
}

//! Batch availability and cost correction endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{BatchId, Money};
use domain::BatchStock;
use ledger_store::{Batch, LedgerStore};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Actor, parse_batch_id};

#[derive(Deserialize)]
pub struct CorrectCostRequest {
    pub unit_cost_cents: i64,
}

#[derive(Serialize)]
pub struct BatchAvailabilityResponse {
    pub batch_id: BatchId,
    pub available: i64,
}

/// GET /batches/{id}/availability
#[tracing::instrument(skip(state))]
pub async fn availability<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BatchAvailabilityResponse>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    let available = state.ledger.available_for_batch(batch_id).await?;
    Ok(Json(BatchAvailabilityResponse {
        batch_id,
        available,
    }))
}

/// GET /batches/{id}/stock: received/consumed/returned/remaining.
#[tracing::instrument(skip(state))]
pub async fn stock<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BatchStock>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    Ok(Json(state.ledger.batch_stock(batch_id).await?))
}

/// PUT /batches/{id}/cost: administrative unit cost correction.
#[tracing::instrument(skip(state, req))]
pub async fn correct_cost<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(req): Json<CorrectCostRequest>,
) -> Result<Json<Batch>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    let batch = state
        .ledger
        .correct_unit_cost(batch_id, Money::from_cents(req.unit_cost_cents), &actor)
        .await?;
    Ok(Json(batch))
}

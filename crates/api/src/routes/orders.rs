//! Order entry and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Money, OrderId, OrderStatus};
use domain::{OrderDetail, OrderDraft};
use ledger_store::{LedgerStore, Order, OrderLine};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Actor, parse_order_id, parse_product_id};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub lines: Vec<OrderLineRequest>,
    #[serde(default)]
    pub cod_amount_cents: i64,
}

#[derive(Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

// -- Handlers --

/// POST /orders: allocate stock and create the order, all or nothing.
#[tracing::instrument(skip(state, req), fields(lines = req.lines.len()))]
pub async fn create<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let lines = req
        .lines
        .iter()
        .map(|line| Ok(OrderLine::new(parse_product_id(&line.product_id)?, line.quantity)))
        .collect::<Result<Vec<_>, ApiError>>()?;
    let draft = OrderDraft::new(lines, Money::from_cents(req.cod_amount_cents));

    let order_id = state.ledger.commit(draft, &actor).await?;

    let response = OrderCreatedResponse {
        order_id,
        status: OrderStatus::Processing,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders: list orders, optionally filtered by `?status=`.
#[tracing::instrument(skip(state))]
pub async fn list<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.ledger.orders(status).await?))
}

/// GET /orders/{id}: an order with its sale movements.
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetail>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.ledger.order(order_id).await?))
}

/// POST /orders/{id}/status: move the order along its lifecycle.
#[tracing::instrument(skip(state, req), fields(to = %req.status))]
pub async fn transition<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .ledger
        .transition_named(order_id, &req.status, &actor)
        .await?;
    Ok(Json(order))
}

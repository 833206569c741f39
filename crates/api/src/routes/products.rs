//! Product catalog, stock-in and availability endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use domain::{AllocationPlan, ProductStock, StockIn};
use ledger_store::{Batch, LedgerStore, NewProduct, Product};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Actor, parse_product_id};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub min_stock_alert: i64,
}

#[derive(Deserialize)]
pub struct ReceiveStockRequest {
    pub lot_number: String,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost_cents: i64,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct PlanRequest {
    pub quantity: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: Product,
    pub available: i64,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub product_id: ProductId,
    pub available: i64,
}

// -- Handlers --

/// POST /products: register a product.
#[tracing::instrument(skip(state, req), fields(sku = %req.sku))]
pub async fn create<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = state
        .ledger
        .register_product(NewProduct::new(req.sku, req.name, req.min_stock_alert))
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /products: list all products ordered by SKU.
#[tracing::instrument(skip(state))]
pub async fn list<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.ledger.products().await?))
}

/// GET /products/{id}: a product with its current availability.
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id = parse_product_id(&id)?;
    let product = state.ledger.product(product_id).await?;
    let available = state.ledger.available_for_product(product_id).await?;
    Ok(Json(ProductResponse { product, available }))
}

/// GET /products/{id}/availability: units available across all batches.
#[tracing::instrument(skip(state))]
pub async fn availability<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let product_id = parse_product_id(&id)?;
    let available = state.ledger.available_for_product(product_id).await?;
    Ok(Json(AvailabilityResponse {
        product_id,
        available,
    }))
}

/// GET /products/{id}/stock: per-batch breakdown, oldest batch first.
#[tracing::instrument(skip(state))]
pub async fn stock<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductStock>, ApiError> {
    let product_id = parse_product_id(&id)?;
    Ok(Json(state.ledger.product_stock(product_id).await?))
}

/// POST /products/{id}/plan: dry-run FIFO allocation. Nothing is written.
#[tracing::instrument(skip(state, req))]
pub async fn plan<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<AllocationPlan>, ApiError> {
    let product_id = parse_product_id(&id)?;
    Ok(Json(state.ledger.plan(product_id, req.quantity).await?))
}

/// GET /products/{id}/batches: a product's batches, oldest first.
#[tracing::instrument(skip(state))]
pub async fn batches<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Batch>>, ApiError> {
    let product_id = parse_product_id(&id)?;
    Ok(Json(state.ledger.batches(product_id).await?))
}

/// POST /products/{id}/batches: stock-in of a new batch.
#[tracing::instrument(skip(state, req))]
pub async fn receive<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(req): Json<ReceiveStockRequest>,
) -> Result<(StatusCode, Json<Batch>), ApiError> {
    let product_id = parse_product_id(&id)?;
    let batch = state
        .ledger
        .receive_stock(
            product_id,
            StockIn {
                lot_number: req.lot_number,
                quantity: req.quantity,
                unit_cost: Money::from_cents(req.unit_cost_cents),
                received_at: req.received_at,
            },
            &actor,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

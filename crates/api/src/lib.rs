//! HTTP API server with observability for the stock ledger.
//!
//! Exposes product registration, stock-in, availability, FIFO planning,
//! order allocation, status transitions and inventory reports as REST
//! endpoints, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::{InventoryLedger, RetryPolicy};
use ledger_store::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{Reconciler, StockLevelsView};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: LedgerStore + Clone> {
    pub ledger: InventoryLedger<S>,
    pub reconciler: Reconciler<S>,
    /// `"memory"` or `"postgres"`, reported by the health check.
    pub store_kind: &'static str,
}

/// Creates the application state over one store handle.
pub fn create_state<S: LedgerStore + Clone + 'static>(
    store: S,
    retry: RetryPolicy,
    store_kind: &'static str,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        ledger: InventoryLedger::new(store.clone(), retry),
        reconciler: Reconciler::new(store, StockLevelsView::new()),
        store_kind,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LedgerStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health::<S>))
        .route(
            "/products",
            post(routes::products::create::<S>).get(routes::products::list::<S>),
        )
        .route("/products/{id}", get(routes::products::get::<S>))
        .route(
            "/products/{id}/availability",
            get(routes::products::availability::<S>),
        )
        .route("/products/{id}/stock", get(routes::products::stock::<S>))
        .route("/products/{id}/plan", post(routes::products::plan::<S>))
        .route(
            "/products/{id}/batches",
            post(routes::products::receive::<S>).get(routes::products::batches::<S>),
        )
        .route(
            "/batches/{id}/availability",
            get(routes::batches::availability::<S>),
        )
        .route("/batches/{id}/stock", get(routes::batches::stock::<S>))
        .route("/batches/{id}/cost", put(routes::batches::correct_cost::<S>))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", post(routes::orders::transition::<S>))
        .route("/reports/inventory", get(routes::reports::inventory::<S>))
        .route("/reports/low-stock", get(routes::reports::low_stock::<S>))
        .route("/reports/audit", get(routes::reports::audit::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

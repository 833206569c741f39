//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::RetryPolicy;
use ledger_store::InMemoryLedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    setup_with_state().0
}

fn setup_with_state() -> (
    axum::Router,
    Arc<api::AppState<InMemoryLedgerStore>>,
) {
    let state = api::create_state(InMemoryLedgerStore::new(), RetryPolicy::immediate(3), "memory");
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn create_product(app: &axum::Router, sku: &str, min_stock_alert: i64) -> String {
    let (status, product) = send(
        app,
        post_json(
            "/products",
            json!({ "sku": sku, "name": format!("Product {sku}"), "min_stock_alert": min_stock_alert }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    product["id"].as_str().unwrap().to_string()
}

async fn receive(app: &axum::Router, product_id: &str, lot: &str, quantity: i64, received_at: &str) {
    let (status, _) = send(
        app,
        post_json(
            &format!("/products/{product_id}/batches"),
            json!({
                "lot_number": lot,
                "quantity": quantity,
                "unit_cost_cents": 250,
                "received_at": received_at
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn place_order(app: &axum::Router, product_id: &str, quantity: i64) -> (StatusCode, Value) {
    send(
        app,
        post_json(
            "/orders",
            json!({ "lines": [{ "product_id": product_id, "quantity": quantity }] }),
        ),
    )
    .await
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_error_responses_are_counted() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 1, "2026-01-01T00:00:00Z").await;

    let (status, _) = place_order(&app, &product_id, 2).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("api_errors_total"));
    assert!(text.contains("insufficient_stock"));
}

#[tokio::test]
async fn test_create_and_get_product() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 5).await;

    let (status, product) = send(&app, get(&format!("/products/{product_id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["sku"], "SKU-001");
    assert_eq!(product["min_stock_alert"], 5);
    assert_eq!(product["available"], 0);

    let (status, products) = send(&app, get("/products")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(products.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_sku_rejected() {
    let app = setup();
    create_product(&app, "SKU-001", 0).await;

    let (status, json) = send(
        &app,
        post_json("/products", json!({ "sku": "SKU-001", "name": "Again" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_stock_in_updates_availability() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 10, "2026-01-01T00:00:00Z").await;
    receive(&app, &product_id, "LOT-B", 5, "2026-01-02T00:00:00Z").await;

    let (status, json) = send(&app, get(&format!("/products/{product_id}/availability"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 15);

    let (status, batches) = send(&app, get(&format!("/products/{product_id}/batches"))).await;
    assert_eq!(status, StatusCode::OK);
    let batches = batches.as_array().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0]["lot_number"], "LOT-A");

    let batch_id = batches[0]["id"].as_str().unwrap();
    let (status, json) = send(&app, get(&format!("/batches/{batch_id}/availability"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 10);
}

#[tokio::test]
async fn test_stock_in_rejects_non_positive_quantity() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;

    let (status, _) = send(
        &app,
        post_json(
            &format!("/products/{product_id}/batches"),
            json!({ "lot_number": "LOT-A", "quantity": 0 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_plan_is_fifo_and_writes_nothing() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-NEW", 10, "2026-02-01T00:00:00Z").await;
    receive(&app, &product_id, "LOT-OLD", 4, "2026-01-01T00:00:00Z").await;

    let (status, plan) = send(
        &app,
        post_json(&format!("/products/{product_id}/plan"), json!({ "quantity": 6 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let deductions = plan["deductions"].as_array().unwrap();
    assert_eq!(deductions.len(), 2);
    assert_eq!(deductions[0]["quantity"], 4);
    assert_eq!(deductions[1]["quantity"], 2);

    let (_, json) = send(&app, get(&format!("/products/{product_id}/availability"))).await;
    assert_eq!(json["available"], 14);
}

#[tokio::test]
async fn test_create_order_allocates_stock() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 10, "2026-01-01T00:00:00Z").await;

    let (status, created) = place_order(&app, &product_id, 3).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "processing");
    let order_id = created["order_id"].as_str().unwrap();

    let (status, order) = send(&app, get(&format!("/orders/{order_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["id"], order_id);
    assert_eq!(order["status"], "processing");
    assert_eq!(order["movements"].as_array().unwrap().len(), 1);
    assert_eq!(order["movements"][0]["quantity_changed"], -3);

    let (_, json) = send(&app, get(&format!("/products/{product_id}/availability"))).await;
    assert_eq!(json["available"], 7);
}

#[tokio::test]
async fn test_insufficient_stock_returns_shortfall() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 5, "2026-01-01T00:00:00Z").await;

    let (status, json) = place_order(&app, &product_id, 8).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["requested"], 8);
    assert_eq!(json["available"], 5);
    assert_eq!(json["shortfall"], 3);
    assert_eq!(json["product_id"], product_id.as_str());

    // Nothing was written
    let (_, json) = send(&app, get(&format!("/products/{product_id}/availability"))).await;
    assert_eq!(json["available"], 5);
    let (_, orders) = send(&app, get("/orders")).await;
    assert!(orders.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_releases_stock_and_terminal_status_rejects_transition() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 5, "2026-01-01T00:00:00Z").await;
    let (_, created) = place_order(&app, &product_id, 5).await;
    let order_id = created["order_id"].as_str().unwrap();

    let (status, order) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/orders/{order_id}/status"))
            .header("content-type", "application/json")
            .header("x-actor-id", "clerk-7")
            .body(Body::from(json!({ "status": "cancelled" }).to_string()))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "cancelled");
    assert_eq!(order["updated_by"], "clerk-7");

    let (_, json) = send(&app, get(&format!("/products/{product_id}/availability"))).await;
    assert_eq!(json["available"], 5);

    let (status, json) = send(
        &app,
        post_json(&format!("/orders/{order_id}/status"), json!({ "status": "sent" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_unknown_status_name_is_bad_request() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 5, "2026-01-01T00:00:00Z").await;
    let (_, created) = place_order(&app, &product_id, 1).await;
    let order_id = created["order_id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        post_json(&format!("/orders/{order_id}/status"), json!({ "status": "lost" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_orders_filtered_by_status() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 10, "2026-01-01T00:00:00Z").await;
    place_order(&app, &product_id, 1).await;
    let (_, created) = place_order(&app, &product_id, 2).await;
    let order_id = created["order_id"].as_str().unwrap();
    send(
        &app,
        post_json(&format!("/orders/{order_id}/status"), json!({ "status": "sent" })),
    )
    .await;

    let (status, orders) = send(&app, get("/orders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders.as_array().unwrap().len(), 2);

    let (status, orders) = send(&app, get("/orders?status=sent")).await;
    assert_eq!(status, StatusCode::OK);
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], order_id);

    let (status, _) = send(&app, get("/orders?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_actor_header_recorded_on_order() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 5, "2026-01-01T00:00:00Z").await;

    let (status, created) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/orders")
            .header("content-type", "application/json")
            .header("x-actor-id", "clerk-42")
            .body(Body::from(
                json!({ "lines": [{ "product_id": product_id, "quantity": 1 }] }).to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = created["order_id"].as_str().unwrap();

    let (_, order) = send(&app, get(&format!("/orders/{order_id}"))).await;
    assert_eq!(order["created_by"], "clerk-42");
    assert_eq!(order["movements"][0]["recorded_by"], "clerk-42");
}

#[tokio::test]
async fn test_missing_actor_header_is_anonymous() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 5, "2026-01-01T00:00:00Z").await;

    let (_, created) = place_order(&app, &product_id, 1).await;
    let order_id = created["order_id"].as_str().unwrap();

    let (_, order) = send(&app, get(&format!("/orders/{order_id}"))).await;
    assert_eq!(order["created_by"], "anonymous");
}

#[tokio::test]
async fn test_invalid_uuid_is_bad_request() {
    let app = setup();

    let (status, json) = send(&app, get("/orders/not-a-uuid")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("order"));
}

#[tokio::test]
async fn test_get_nonexistent_resources() {
    let app = setup();
    let fake_id = uuid::Uuid::new_v4();

    let (status, _) = send(&app, get(&format!("/orders/{fake_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get(&format!("/products/{fake_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get(&format!("/batches/{fake_id}/availability"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_order_for_unknown_product_is_not_found() {
    let app = setup();
    let fake_id = uuid::Uuid::new_v4().to_string();

    let (status, _) = place_order(&app, &fake_id, 1).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_correct_batch_cost() {
    let app = setup();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 5, "2026-01-01T00:00:00Z").await;
    let (_, batches) = send(&app, get(&format!("/products/{product_id}/batches"))).await;
    let batch_id = batches[0]["id"].as_str().unwrap();

    let (status, batch) = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("/batches/{batch_id}/cost"))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "unit_cost_cents": 900 }).to_string()))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["unit_cost"], 900);
}

#[tokio::test]
async fn test_inventory_and_low_stock_reports() {
    let app = setup();
    let low = create_product(&app, "SKU-LOW", 10).await;
    let plenty = create_product(&app, "SKU-PLENTY", 2).await;
    receive(&app, &low, "LOT-A", 4, "2026-01-01T00:00:00Z").await;
    receive(&app, &plenty, "LOT-B", 50, "2026-01-01T00:00:00Z").await;

    let (status, inventory) = send(&app, get("/reports/inventory")).await;
    assert_eq!(status, StatusCode::OK);
    let inventory = inventory.as_array().unwrap();
    assert_eq!(inventory.len(), 2);
    let plenty_report = inventory
        .iter()
        .find(|report| report["sku"] == "SKU-PLENTY")
        .unwrap();
    assert_eq!(plenty_report["remaining"], 50);
    assert_eq!(plenty_report["stock_value"], 50 * 250);

    let (status, low_stock) = send(&app, get("/reports/low-stock")).await;
    assert_eq!(status, StatusCode::OK);
    let low_stock = low_stock.as_array().unwrap();
    assert_eq!(low_stock.len(), 1);
    assert_eq!(low_stock[0]["sku"], "SKU-LOW");
}

#[tokio::test]
async fn test_audit_of_consistent_ledger_is_clean() {
    let (app, state) = setup_with_state();
    let product_id = create_product(&app, "SKU-001", 0).await;
    receive(&app, &product_id, "LOT-A", 5, "2026-01-01T00:00:00Z").await;
    place_order(&app, &product_id, 2).await;

    let (status, report) = send(&app, get("/reports/audit")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["movements_checked"], 2);
    assert!(report["discrepancies"].as_array().unwrap().is_empty());

    // The audit refreshes the cached view
    assert_eq!(state.reconciler.view().products().await.len(), 1);

    let (_, health) = send(&app, get("/health")).await;
    assert!(health["stock_view_refreshed_at"].is_string());
}

//! End-to-end tests of the HTTP gateway over in-memory stores.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use order_intake_core::{Order, OrderId, OrderStatus, OrderStore};
use order_intake_runtime::{Orchestrator, Placement};
use order_intake_testing::{FlakyOrderStore, InMemoryOrderStore, sample_command, stepping_clock};
use order_intake_web::{AppState, REQUEST_ID_HEADER, router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn server_over(store: Arc<dyn OrderStore>, request_timeout: Duration) -> (TestServer, Arc<Orchestrator>) {
    let orchestrator = Arc::new(Orchestrator::new(store).with_clock(Arc::new(stepping_clock())));
    let app = router(
        AppState::new(orchestrator.clone()).with_version("test"),
        request_timeout,
    );
    (TestServer::new(app).unwrap(), orchestrator)
}

fn server() -> (TestServer, Arc<Orchestrator>) {
    server_over(Arc::new(InMemoryOrderStore::new()), Duration::from_secs(5))
}

async fn place(orchestrator: &Orchestrator, key: &str, user: &str) -> Order {
    orchestrator
        .place_order(sample_command(key, user))
        .await
        .map(Placement::into_order)
        .unwrap()
}

#[tokio::test]
async fn test_get_order_returns_order_with_total() {
    let (server, orchestrator) = server();
    let order = place(&orchestrator, "k1", "u1").await;

    let response = server.get(&format!("/orders/v1/get-order/{}", order.id)).await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["id"], order.id.to_string());
    assert_eq!(body["userID"], "u1");
    assert_eq!(body["status"], "Placed");
    assert_eq!(body["idempotencyKey"], "k1");
    assert_eq!(body["items"][0]["productID"], "A");
    assert_eq!(body["items"][0]["quantity"], 2);
    assert_eq!(body["items"][0]["unitPrice"], 10);
    assert_eq!(body["total"], 20);
}

#[tokio::test]
async fn test_get_unknown_order_is_404() {
    let (server, _) = server();
    let id = OrderId::from_uuid(uuid::Uuid::new_v4());

    let response = server.get(&format!("/orders/v1/get-order/{id}")).await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_id_is_400() {
    let (server, _) = server();

    let response = server.get("/orders/v1/get-order/not-a-uuid").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");

    server
        .get("/orders/v1/cancel-order")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_then_cancel_again_is_409() {
    let (server, orchestrator) = server();
    let order = place(&orchestrator, "k1", "u1").await;

    let first = server
        .get("/orders/v1/cancel-order")
        .add_query_param("id", order.id)
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>()["status"], "Cancelled");

    let second = server
        .get("/orders/v1/cancel-order")
        .add_query_param("id", order.id)
        .await;
    second.assert_status(StatusCode::CONFLICT);
    assert_eq!(second.json::<Value>()["code"], "INVALID_STATE");

    let stored = orchestrator.get_order(&order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_list_user_orders_oldest_first() {
    let (server, orchestrator) = server();
    let first = place(&orchestrator, "k1", "u1").await;
    place(&orchestrator, "k2", "u2").await;
    let third = place(&orchestrator, "k3", "u1").await;

    let response = server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "userID": "u1" }))
        .await;
    response.assert_status_ok();

    let body: Vec<Value> = response.json();
    let ids: Vec<&str> = body.iter().filter_map(|o| o["id"].as_str()).collect();
    assert_eq!(ids, vec![first.id.to_string(), third.id.to_string()]);
}

#[tokio::test]
async fn test_list_unknown_user_is_empty() {
    let (server, _) = server();
    let response = server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "userID": "nobody" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Vec<Value>>().len(), 0);
}

#[tokio::test]
async fn test_list_rejects_bad_body() {
    let (server, _) = server();
    server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "user": "u1" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "userID": "  " }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_store_outage_is_503() {
    let store = Arc::new(FlakyOrderStore::new());
    let (server, _) = server_over(store.clone(), Duration::from_secs(5));
    store.set_unavailable(true);

    let response = server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "userID": "u1" }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "SERVICE_UNAVAILABLE");

    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_slow_request_times_out_with_408() {
    let store = Arc::new(FlakyOrderStore::new().with_delay(Duration::from_millis(500)));
    let (server, _) = server_over(store, Duration::from_millis(50));

    let response = server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "userID": "u1" }))
        .await;
    response.assert_status(StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.json::<Value>()["code"], "TIMEOUT");
}

#[tokio::test]
async fn test_nul_in_user_id_is_400() {
    let (server, _) = server();
    let response = server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "userID": "u1\u{0}" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_values_refused_by_store_are_400() {
    let store = Arc::new(FlakyOrderStore::new());
    let (server, _) = server_over(store.clone(), Duration::from_secs(5));
    store.set_rejecting(true);

    let response = server
        .post("/orders/v1/get-user-all-orders")
        .json(&json!({ "userID": "u1" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "BAD_REQUEST");

    server.get("/health/ready").await.assert_status_ok();
}

#[tokio::test]
async fn test_health_endpoints() {
    let (server, _) = server();

    let live = server.get("/health").await;
    live.assert_status_ok();
    live.assert_json(&json!({ "status": "ok", "version": "test" }));

    server.get("/health/ready").await.assert_status_ok();
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let (server, _) = server();
    let response = server.get("/health").await;
    let id = response.header(REQUEST_ID_HEADER);
    assert!(uuid::Uuid::parse_str(id.to_str().unwrap()).is_ok());
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let (server, _) = server();
    let response = server.get("/orders/v2/nothing").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "NOT_FOUND");
}

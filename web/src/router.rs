//! Route table and middleware stack.

use crate::error::AppError;
use crate::handlers::{cancel_order, get_order, health_check, list_user_orders, readiness_check};
use crate::middleware::request_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    http::{StatusCode, Uri},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the gateway router.
///
/// ```text
/// GET  /orders/v1/get-order/:id
/// GET  /orders/v1/cancel-order?id=...
/// POST /orders/v1/get-user-all-orders
/// GET  /health
/// GET  /health/ready
/// ```
///
/// Requests that exceed `request_timeout` are answered with 408 and the
/// usual error body.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/orders/v1/get-order/:id", get(get_order))
        .route("/orders/v1/cancel-order", get(cancel_order))
        .route("/orders/v1/get-user-all-orders", post(list_user_orders))
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .fallback(not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(map_response(timeout_body))
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
}

#[allow(clippy::unused_async)]
async fn not_found(uri: Uri) -> AppError {
    AppError::not_found("Route", uri.path())
}

/// `TimeoutLayer` answers with an empty 408.
#[allow(clippy::unused_async)]
async fn timeout_body(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return AppError::timeout("Request timed out").into_response();
    }
    response
}

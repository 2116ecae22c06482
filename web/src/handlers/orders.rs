//! Order query and cancel endpoints.

use crate::WebResult;
use crate::error::AppError;
use crate::extractors::{OrderIdPath, OrderIdQuery, RequestId};
use crate::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use order_intake_core::{Order, UserId};
use serde::{Deserialize, Serialize};

/// Order as returned over HTTP: the stored fields plus the derived total.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    order: Order,
    /// Sum of quantity × unit price, in minor units
    total: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let total = order.total().minor();
        Self { order, total }
    }
}

/// Body of `POST /orders/v1/get-user-all-orders`.
#[derive(Debug, Deserialize)]
pub struct UserOrdersRequest {
    /// User whose orders to list
    #[serde(rename = "userID", alias = "user_id", alias = "userId")]
    pub user_id: String,
}

/// `GET /orders/v1/get-order/:id`
///
/// # Errors
///
/// 400 for a malformed id, 404 if the order does not exist, 503 if the
/// store is unavailable.
pub async fn get_order(
    State(state): State<AppState>,
    request_id: RequestId,
    OrderIdPath(id): OrderIdPath,
) -> WebResult<Json<OrderResponse>> {
    tracing::debug!(request_id = %request_id.0, order_id = %id, "Get order");
    let order = state.orchestrator().get_order(&id).await?;
    Ok(Json(order.into()))
}

/// `GET /orders/v1/cancel-order?id=...`
///
/// # Errors
///
/// 400 for a missing or malformed id, 404 if the order does not exist, 409
/// if it is already terminal, 503 if the store is unavailable.
pub async fn cancel_order(
    State(state): State<AppState>,
    request_id: RequestId,
    OrderIdQuery(id): OrderIdQuery,
) -> WebResult<Json<OrderResponse>> {
    tracing::info!(request_id = %request_id.0, order_id = %id, "Cancel order");
    let order = state.orchestrator().cancel_order(&id).await?;
    Ok(Json(order.into()))
}

/// `POST /orders/v1/get-user-all-orders` with `{"userID": "..."}`
///
/// Orders come back oldest first; an unknown user gets an empty list.
///
/// # Errors
///
/// 400 for a malformed body, an empty user id or one the store cannot
/// accept, 503 if the store is unavailable.
pub async fn list_user_orders(
    State(state): State<AppState>,
    request_id: RequestId,
    body: Result<Json<UserOrdersRequest>, JsonRejection>,
) -> WebResult<Json<Vec<OrderResponse>>> {
    let Json(request) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    if request.user_id.trim().is_empty() {
        return Err(AppError::bad_request("userID must not be empty"));
    }
    if request.user_id.contains('\0') {
        return Err(AppError::bad_request("userID must not contain NUL characters"));
    }

    tracing::debug!(request_id = %request_id.0, user_id = %request.user_id, "List user orders");
    let orders = state
        .orchestrator()
        .list_user_orders(&UserId::new(request.user_id))
        .await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

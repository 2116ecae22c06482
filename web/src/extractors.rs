//! Custom Axum extractors.
//!
//! - [`OrderIdPath`]: order id from the last path segment
//! - [`OrderIdQuery`]: order id from the `id` query parameter
//! - [`RequestId`]: id assigned by [`request_id_layer`](crate::middleware::request_id_layer)
//!
//! Order id extractors reject with a JSON 400 instead of axum's plain-text
//! rejection, so every error body has the same shape.

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query},
    http::request::Parts,
};
use order_intake_core::OrderId;
use serde::Deserialize;
use uuid::Uuid;

fn parse_order_id(raw: &str) -> Result<OrderId, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("Invalid order id '{raw}'")))
}

/// Order id taken from the path (`/orders/v1/get-order/{id}`).
#[derive(Debug, Clone, Copy)]
pub struct OrderIdPath(pub OrderId);

#[async_trait]
impl<S> FromRequestParts<S> for OrderIdPath
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        parse_order_id(&raw).map(Self)
    }
}

#[derive(Debug, Deserialize)]
struct IdParam {
    id: Option<String>,
}

/// Order id taken from the `id` query parameter (`?id=...`).
#[derive(Debug, Clone, Copy)]
pub struct OrderIdQuery(pub OrderId);

#[async_trait]
impl<S> FromRequestParts<S> for OrderIdQuery
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(param) = Query::<IdParam>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        let raw = param
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("Missing query parameter 'id'"))?;
        parse_order_id(&raw).map(Self)
    }
}

/// Request id for log correlation.
///
/// Reads the id stored by the request-id middleware, or generates a fresh
/// one when the middleware is not installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Self>()
            .copied()
            .unwrap_or_else(|| Self(Uuid::new_v4())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn query_id(uri: &str) -> Result<OrderIdQuery, AppError> {
        let (mut parts, ()) = Request::builder()
            .uri(uri)
            .body(())
            .unwrap_or_default()
            .into_parts();
        OrderIdQuery::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_query_id_parses_uuid() {
        let id = Uuid::new_v4();
        let extracted = query_id(&format!("/cancel?id={id}")).await;
        assert!(matches!(extracted, Ok(OrderIdQuery(found)) if *found.as_uuid() == id));
    }

    #[tokio::test]
    async fn test_query_id_rejects_missing_and_malformed() {
        for uri in ["/cancel", "/cancel?id=", "/cancel?id=not-a-uuid"] {
            let err = query_id(uri).await.err();
            assert_eq!(
                err.map(|e| e.status()),
                Some(StatusCode::BAD_REQUEST),
                "{uri}"
            );
        }
    }

    #[tokio::test]
    async fn test_request_id_falls_back_to_fresh_id() {
        let (mut parts, ()) = Request::builder()
            .uri("/")
            .body(())
            .unwrap_or_default()
            .into_parts();
        let known = RequestId(Uuid::new_v4());
        parts.extensions.insert(known);

        let Ok(found) = RequestId::from_request_parts(&mut parts, &()).await;
        assert_eq!(found, known);
    }
}

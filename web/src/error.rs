//! Error types for web handlers.
//!
//! [`AppError`] bridges the order error taxonomy and HTTP responses. Every
//! error body has the same shape:
//!
//! ```json
//! { "code": "NOT_FOUND", "message": "Order 6f1c... not found" }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use order_intake_core::OrderError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>, id: OrderIdPath) -> Result<Json<OrderResponse>, AppError> {
///     let order = state.orchestrator().get_order(&id.0).await?;
///     Ok(Json(OrderResponse::from(order)))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} {id} not found"),
            "NOT_FOUND",
        )
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// 408 Request Timeout
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT, message, "TIMEOUT")
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// 503 Service Unavailable
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message,
            "SERVICE_UNAVAILABLE",
        )
    }

    /// HTTP status of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Orchestrator errors.
///
/// Transient, timeout and fatal failures all read as 503 so callers never
/// see retry churn; the fatal case has already been reported to the
/// supervisor by the orchestrator. Values the store refuses are the
/// caller's problem (400); an undecodable stored row is ours (500).
impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match &err {
            OrderError::NotFound(id) if id.is_empty() => {
                Self::new(StatusCode::NOT_FOUND, "Order not found", "NOT_FOUND")
            }
            OrderError::NotFound(id) => Self::not_found("Order", id),
            OrderError::InvalidState { .. } => {
                Self::new(StatusCode::CONFLICT, err.to_string(), "INVALID_STATE")
            }
            OrderError::Conflict(_) => Self::conflict(err.to_string()),
            OrderError::Rejected(_) => {
                Self::bad_request("Request contains values the order store cannot accept")
                    .with_source(anyhow::Error::new(err))
            }
            OrderError::Corrupt(_) => {
                Self::internal("Stored order could not be read").with_source(anyhow::Error::new(err))
            }
            OrderError::Transient { .. } | OrderError::Timeout | OrderError::Fatal(_) => {
                Self::unavailable("Order store unavailable, try again later")
                    .with_source(anyhow::Error::new(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_intake_core::{IdempotencyKey, OrderId, OrderStatus};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid order id");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid order id");
    }

    #[test]
    fn test_order_error_mapping() {
        let id = OrderId::for_key(&IdempotencyKey::new("k1"));
        let cases = [
            (OrderError::NotFound(id.to_string()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                OrderError::InvalidState { id, status: OrderStatus::Cancelled },
                StatusCode::CONFLICT,
                "INVALID_STATE",
            ),
            (OrderError::Conflict("k1".into()), StatusCode::CONFLICT, "CONFLICT"),
            (
                OrderError::Rejected("invalid byte sequence".into()),
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
            ),
            (
                OrderError::Corrupt("unknown status 'shipped'".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
            (
                OrderError::Transient { attempt: 2, reason: "refused".into() },
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
            (OrderError::Timeout, StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            (
                OrderError::Fatal("pool closed".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
        ];

        for (err, status, code) in cases {
            let app = AppError::from(err);
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn test_unavailable_hides_cause() {
        let app = AppError::from(OrderError::Fatal("password authentication failed".into()));
        assert!(!app.to_string().contains("password"));
        assert!(std::error::Error::source(&app).is_some());
    }
}

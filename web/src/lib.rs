//! HTTP gateway for the order intake service.
//!
//! Query and cancel paths over the [`Orchestrator`](order_intake_runtime::Orchestrator).
//! The gateway never writes orders itself; placement only arrives through
//! the message bus.
//!
//! # Request Flow
//!
//! 1. **Request id** assigned (or taken from `x-request-id`) and traced
//! 2. **Extract** the order id or request body; malformed input is a 400
//! 3. **Call** the orchestrator
//! 4. **Map** the result to JSON, or [`AppError`] to `{code, message}`
//!
//! # Example
//!
//! ```ignore
//! let state = AppState::new(orchestrator);
//! let app = router(state, Duration::from_secs(10));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! serve(listener, app, shutdown_rx).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{OrderIdPath, OrderIdQuery, RequestId};
pub use middleware::{REQUEST_ID_HEADER, request_id_layer};
pub use router::router;
pub use state::AppState;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Serve `app` on `listener` until the shutdown broadcast.
///
/// In-flight requests are drained before this returns.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP gateway listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP gateway draining");
        })
        .await
}

//! Prometheus metrics for order intake.
//!
//! Counters and histograms are recorded through the `metrics` facade; with no
//! recorder installed they are no-ops, which is what tests run with.
//!
//! # Example
//!
//! ```rust,no_run
//! use order_intake_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://0.0.0.0:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Orders created as `Placed`.
pub const ORDERS_PLACED: &str = "orders_placed_total";
/// Redeliveries resolved to an existing order.
pub const ORDERS_DUPLICATE: &str = "orders_duplicate_total";
/// Orders recorded as `Failed` after the retry ceiling.
pub const ORDERS_FAILED: &str = "orders_failed_total";
/// Orders moved to `Cancelled`.
pub const ORDERS_CANCELLED: &str = "orders_cancelled_total";
/// Bus messages that failed to decode or validate.
pub const MESSAGES_REJECTED: &str = "order_messages_rejected_total";
/// Transient placement failures (one per failed attempt).
pub const PLACEMENT_RETRIES: &str = "order_placement_retries_total";
/// Wall time of `place_order`.
pub const PLACEMENT_DURATION: &str = "order_placement_duration_seconds";
/// Failed liveness heartbeats.
pub const HEARTBEAT_FAILURES: &str = "registry_heartbeat_failures_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build or install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Install the global recorder and start the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed or
    /// the listener cannot be started.
    pub fn start(&self) -> Result<(), MetricsError> {
        register_metrics();

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Install(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
        Ok(())
    }
}

fn register_metrics() {
    describe_counter!(ORDERS_PLACED, "Total number of orders created as Placed");
    describe_counter!(ORDERS_DUPLICATE, "Total number of redelivered commands resolved to an existing order");
    describe_counter!(ORDERS_FAILED, "Total number of orders recorded as Failed after the retry ceiling");
    describe_counter!(ORDERS_CANCELLED, "Total number of cancelled orders");
    describe_counter!(MESSAGES_REJECTED, "Total number of place-order messages that failed to decode");
    describe_counter!(PLACEMENT_RETRIES, "Total number of transient placement failures");
    describe_histogram!(PLACEMENT_DURATION, "Time spent placing an order");
    describe_counter!(HEARTBEAT_FAILURES, "Total number of failed registry heartbeats");
}

/// Order lifecycle metrics recorder.
pub struct OrderMetrics;

impl OrderMetrics {
    /// Record a newly created order.
    pub fn record_placed(duration: Duration) {
        counter!(ORDERS_PLACED).increment(1);
        histogram!(PLACEMENT_DURATION).record(duration.as_secs_f64());
    }

    /// Record a duplicate delivery.
    pub fn record_duplicate() {
        counter!(ORDERS_DUPLICATE).increment(1);
    }

    /// Record an order that exhausted its retries.
    pub fn record_failed() {
        counter!(ORDERS_FAILED).increment(1);
    }

    /// Record a transient placement failure.
    pub fn record_retry() {
        counter!(PLACEMENT_RETRIES).increment(1);
    }

    /// Record a cancellation.
    pub fn record_cancelled() {
        counter!(ORDERS_CANCELLED).increment(1);
    }

    /// Record a rejected bus message, labelled by rejection reason.
    pub fn record_rejected(reason: &'static str) {
        counter!(MESSAGES_REJECTED, "reason" => reason).increment(1);
    }

    /// Record a failed heartbeat.
    pub fn record_heartbeat_failure() {
        counter!(HEARTBEAT_FAILURES).increment(1);
    }
}

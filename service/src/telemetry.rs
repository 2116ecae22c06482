//! Logging and distributed tracing.
//!
//! `tracing-subscriber` with an `EnvFilter` and a `fmt` layer. When a Jaeger
//! agent endpoint is configured, spans are also exported through
//! `tracing-opentelemetry`.

use crate::config::TelemetryConfig;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Telemetry setup errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Log filter directives could not be parsed
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// Jaeger pipeline could not be installed
    #[error("Failed to install Jaeger pipeline: {0}")]
    Jaeger(String),

    /// A global subscriber is already installed
    #[error("Failed to install subscriber: {0}")]
    Subscriber(String),
}

/// Keeps span export alive; call [`Telemetry::shutdown`] before exit.
#[derive(Debug)]
#[must_use]
pub struct Telemetry {
    exporting: bool,
}

impl Telemetry {
    /// Flush and stop span export.
    pub fn shutdown(self) {
        if self.exporting {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the filter is invalid, the Jaeger pipeline
/// cannot be installed, or a subscriber is already set.
pub fn init(config: &TelemetryConfig, service_name: &str) -> Result<Telemetry, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    let otel = match &config.tracer_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_jaeger::new_agent_pipeline()
                .with_service_name(service_name)
                .with_endpoint(endpoint)
                .install_simple()
                .map_err(|e| TelemetryError::Jaeger(e.to_string()))?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let exporting = otel.is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        service = service_name,
        jaeger = config.tracer_endpoint.as_deref().unwrap_or("disabled"),
        "Telemetry initialized"
    );

    Ok(Telemetry { exporting })
}

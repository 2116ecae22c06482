//! Order service entry point.

use order_service::{Application, Config, telemetry};
use order_intake_runtime::wait_for_signal;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("order-service: {e}");
            return ExitCode::FAILURE;
        }
    };

    let telemetry = match telemetry::init(&config.telemetry, &config.registry.service_name) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("order-service: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting order service");

    let app = match Application::start(config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = ?e, "Startup failed");
            telemetry.shutdown();
            return ExitCode::FAILURE;
        }
    };

    let report = app.run(wait_for_signal()).await;
    tracing::info!(
        cause = %report.cause,
        clean = report.is_clean(),
        "Order service stopped"
    );
    telemetry.shutdown();

    ExitCode::SUCCESS
}

//! Application state for Axum handlers.

use order_intake_runtime::Orchestrator;
use std::sync::Arc;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    version: &'static str,
}

impl AppState {
    /// State over a shared orchestrator, reporting this crate's version.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Override the version reported by `/health`.
    #[must_use]
    pub const fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// The orchestrator
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Reported version
    #[must_use]
    pub const fn version(&self) -> &'static str {
        self.version
    }
}

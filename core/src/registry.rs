//! Service registry abstraction.
//!
//! The registry is the service-discovery/health fabric the process reports
//! liveness to. Registration uses a TTL health check: the service must call
//! [`ServiceRegistry::report_healthy`] more often than the TTL or the registry
//! marks it critical and stops routing to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by registry clients.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// Registry could not be reached
    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    /// Registry answered with an error status
    #[error("Registry rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-like status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Call exceeded its deadline
    #[error("Registry call timed out")]
    Timeout,
}

/// What gets registered for this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Unique id of this instance
    pub id: String,
    /// Logical service name shared by the fleet
    pub name: String,
    /// Address other services should dial
    pub address: String,
    /// Port other services should dial
    pub port: u16,
    /// Health-check TTL
    pub ttl: Duration,
    /// Free-form tags
    pub tags: Vec<String>,
}

impl ServiceRegistration {
    /// Health check id derived from the service id.
    #[must_use]
    pub fn check_id(&self) -> String {
        format!("service:{}", self.id)
    }
}

/// Client for the service-discovery registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Register the service instance together with its TTL check.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the registry is unreachable or rejects the call.
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError>;

    /// Push a passing health signal for the instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the signal could not be delivered.
    async fn report_healthy(&self, registration: &ServiceRegistration) -> Result<(), RegistryError>;

    /// Remove the instance from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the registry is unreachable or rejects the call.
    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError>;
}

//! Consul agent registry client for the order intake service.
//!
//! Implements [`ServiceRegistry`] against the local Consul agent's HTTP API:
//!
//! | Operation | Request |
//! |---|---|
//! | register | `PUT /v1/agent/service/register` with a TTL check |
//! | report healthy | `PUT /v1/agent/check/pass/{check_id}` |
//! | deregister | `PUT /v1/agent/service/deregister/{service_id}` |
//!
//! # Example
//!
//! ```no_run
//! use order_intake_consul::ConsulRegistry;
//! use order_intake_core::{ServiceRegistration, ServiceRegistry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ConsulRegistry::new("http://localhost:8500")?;
//! let registration = ServiceRegistration {
//!     id: "order-service-1".into(),
//!     name: "order-service".into(),
//!     address: "127.0.0.1".into(),
//!     port: 8080,
//!     ttl: Duration::from_secs(15),
//!     tags: vec![],
//! };
//! registry.register(&registration).await?;
//! registry.report_healthy(&registration).await?;
//! registry.deregister(&registration.id).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod payload;

use async_trait::async_trait;
use order_intake_core::{RegistryError, ServiceRegistration, ServiceRegistry};
use payload::AgentServiceRegistration;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DEREGISTER_AFTER: Duration = Duration::from_secs(60);

/// Consul agent client.
#[derive(Clone)]
pub struct ConsulRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
    deregister_after: Duration,
}

impl ConsulRegistry {
    /// Create a client for the agent at `base_url` (e.g. `http://localhost:8500`).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unreachable`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistryError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unreachable`] if the HTTP client cannot be built.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            deregister_after: DEFAULT_DEREGISTER_AFTER,
        })
    }

    /// ACL token sent as `X-Consul-Token`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// How long the check may stay critical before Consul removes the service.
    #[must_use]
    pub const fn with_deregister_after(mut self, after: Duration) -> Self {
        self.deregister_after = after;
        self
    }

    /// Agent base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn put(&self, path: &str) -> RequestBuilder {
        let request = self.client.put(format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => request.header("X-Consul-Token", token),
            None => request,
        }
    }

    async fn send(request: RequestBuilder) -> Result<(), RegistryError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RegistryError::Timeout
            } else {
                RegistryError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(RegistryError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        let body = AgentServiceRegistration::new(registration, self.deregister_after);
        Self::send(self.put("/v1/agent/service/register").json(&body)).await?;
        tracing::info!(
            service_id = %registration.id,
            check_id = %body.check.check_id,
            ttl = %body.check.ttl,
            "Registered with Consul"
        );
        Ok(())
    }

    async fn report_healthy(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        let path = format!("/v1/agent/check/pass/{}", registration.check_id());
        Self::send(self.put(&path)).await
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let path = format!("/v1/agent/service/deregister/{service_id}");
        Self::send(self.put(&path)).await?;
        tracing::info!(service_id, "Deregistered from Consul");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let registry = ConsulRegistry::new("http://consul:8500/").unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(registry.base_url(), "http://consul:8500");
    }
}

//! Liveness reporting to the service registry.
//!
//! [`RegistrationHandle`] is the proof that this process is registered. It is
//! created by [`RegistrationHandle::register`] at start and consumed by
//! [`RegistrationHandle::deregister`] at stop, so deregistration can happen
//! at most once. [`LivenessReporter`] pushes TTL passes while the process
//! runs; [`DeregisterOnShutdown`] hands the handle to the shutdown path.

use crate::metrics::OrderMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::shutdown::ShutdownHandler;
use async_trait::async_trait;
use order_intake_core::{RegistryError, ServiceRegistration, ServiceRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Owned proof of registration. Not `Clone`.
#[derive(Debug)]
pub struct RegistrationHandle {
    registration: ServiceRegistration,
}

impl RegistrationHandle {
    /// Register the service, retrying unreachable-registry errors per `policy`.
    ///
    /// # Errors
    ///
    /// The last [`RegistryError`] once retries are exhausted, or immediately
    /// if the registry rejects the registration.
    pub async fn register(
        registry: &dyn ServiceRegistry,
        registration: ServiceRegistration,
        policy: &RetryPolicy,
    ) -> Result<Self, RegistryError> {
        retry_with_predicate(
            policy,
            || registry.register(&registration),
            |err| !matches!(err, RegistryError::Rejected { .. }),
        )
        .await?;

        info!(
            service_id = %registration.id,
            service = %registration.name,
            address = %registration.address,
            port = registration.port,
            "Registered with service registry"
        );
        Ok(Self { registration })
    }

    /// What was registered
    #[must_use]
    pub const fn registration(&self) -> &ServiceRegistration {
        &self.registration
    }

    /// Remove the registration, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Timeout`] if the registry does not answer in time,
    /// or the registry's own error.
    pub async fn deregister(
        self,
        registry: &dyn ServiceRegistry,
        timeout: Duration,
    ) -> Result<(), RegistryError> {
        tokio::time::timeout(timeout, registry.deregister(&self.registration.id))
            .await
            .map_err(|_| RegistryError::Timeout)??;
        info!(service_id = %self.registration.id, "Deregistered from service registry");
        Ok(())
    }
}

/// Periodically reports the process as healthy.
///
/// Heartbeat failures are logged and counted but never stop the reporter;
/// the registry's TTL takes the instance out of rotation if they persist.
pub struct LivenessReporter {
    registry: Arc<dyn ServiceRegistry>,
    registration: ServiceRegistration,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl LivenessReporter {
    /// Reporter for the registration behind `handle`.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        handle: &RegistrationHandle,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            registration: handle.registration().clone(),
            interval,
            shutdown,
        }
    }

    /// Report until the shutdown broadcast.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures: u32 = 0;

        info!(
            service_id = %self.registration.id,
            interval = ?self.interval,
            "Liveness reporter started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            let report = tokio::time::timeout(
                self.interval,
                self.registry.report_healthy(&self.registration),
            )
            .await
            .unwrap_or(Err(RegistryError::Timeout));

            match report {
                Ok(()) => {
                    if consecutive_failures > 0 {
                        info!(after_failures = consecutive_failures, "Liveness reporting recovered");
                    }
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    OrderMetrics::record_heartbeat_failure();
                    warn!(
                        service_id = %self.registration.id,
                        consecutive_failures,
                        error = %e,
                        "Failed to report liveness"
                    );
                }
            }
        }

        info!(service_id = %self.registration.id, "Liveness reporter stopped");
    }
}

/// Shutdown handler that consumes the [`RegistrationHandle`].
pub struct DeregisterOnShutdown {
    registry: Arc<dyn ServiceRegistry>,
    handle: Mutex<Option<RegistrationHandle>>,
    timeout: Duration,
}

impl DeregisterOnShutdown {
    /// Take ownership of `handle` for deregistration at shutdown.
    #[must_use]
    pub fn new(registry: Arc<dyn ServiceRegistry>, handle: RegistrationHandle, timeout: Duration) -> Self {
        Self {
            registry,
            handle: Mutex::new(Some(handle)),
            timeout,
        }
    }
}

#[async_trait]
impl ShutdownHandler for DeregisterOnShutdown {
    fn name(&self) -> &str {
        "registry-deregistration"
    }

    async fn shutdown(&self) -> Result<(), String> {
        let Some(handle) = self.handle.lock().await.take() else {
            return Ok(());
        };
        handle
            .deregister(self.registry.as_ref(), self.timeout)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use order_intake_testing::RecordingRegistry;

    fn registration() -> ServiceRegistration {
        ServiceRegistration {
            id: "order-service-1".to_string(),
            name: "order-service".to_string(),
            address: "127.0.0.1".to_string(),
            port: 8080,
            ttl: Duration::from_secs(15),
            tags: vec![],
        }
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy::builder().max_retries(0).build()
    }

    #[tokio::test]
    async fn test_deregister_runs_once() {
        let registry = Arc::new(RecordingRegistry::new());
        let handle = RegistrationHandle::register(registry.as_ref(), registration(), &no_retry())
            .await
            .unwrap();
        let handler = DeregisterOnShutdown::new(registry.clone(), handle, Duration::from_secs(1));

        handler.shutdown().await.unwrap();
        handler.shutdown().await.unwrap();
        assert_eq!(registry.deregistrations(), vec!["order-service-1".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_deregistration_times_out() {
        let registry = Arc::new(RecordingRegistry::new());
        registry.set_deregister_delay(Duration::from_secs(5));
        let handle = RegistrationHandle::register(registry.as_ref(), registration(), &no_retry())
            .await
            .unwrap();

        let result = handle.deregister(registry.as_ref(), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(RegistryError::Timeout)));
    }

    #[tokio::test]
    async fn test_reporter_survives_heartbeat_failures() {
        let registry = Arc::new(RecordingRegistry::new());
        let handle = RegistrationHandle::register(registry.as_ref(), registration(), &no_retry())
            .await
            .unwrap();
        registry.set_fail_heartbeats(true);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let reporter = LivenessReporter::new(registry.clone(), &handle, Duration::from_millis(5), shutdown_rx);
        let task = tokio::spawn(reporter.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());
        registry.set_fail_heartbeats(false);

        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.heartbeat_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}

//! Registry double that records every call.

use async_trait::async_trait;
use order_intake_core::{RegistryError, ServiceRegistration, ServiceRegistry};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Records registrations, heartbeats and deregistrations.
#[derive(Default)]
pub struct RecordingRegistry {
    registered: Mutex<Vec<ServiceRegistration>>,
    deregistered: Mutex<Vec<String>>,
    heartbeats: AtomicUsize,
    fail_register: AtomicBool,
    fail_heartbeats: AtomicBool,
    fail_deregister: AtomicBool,
    deregister_delay: Mutex<Option<Duration>>,
}

impl RecordingRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `register` fail
    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    /// Make `report_healthy` fail
    pub fn set_fail_heartbeats(&self, fail: bool) {
        self.fail_heartbeats.store(fail, Ordering::SeqCst);
    }

    /// Make `deregister` fail
    pub fn set_fail_deregister(&self, fail: bool) {
        self.fail_deregister.store(fail, Ordering::SeqCst);
    }

    /// Make `deregister` sleep before answering
    pub fn set_deregister_delay(&self, delay: Duration) {
        *self
            .deregister_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Registrations received so far
    #[must_use]
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Service ids deregistered so far
    #[must_use]
    pub fn deregistrations(&self) -> Vec<String> {
        self.deregistered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Successful heartbeats so far
    #[must_use]
    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceRegistry for RecordingRegistry {
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(RegistryError::Unreachable("injected register failure".to_string()));
        }
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registration.clone());
        Ok(())
    }

    async fn report_healthy(&self, _registration: &ServiceRegistration) -> Result<(), RegistryError> {
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(RegistryError::Unreachable("injected heartbeat failure".to_string()));
        }
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let delay = *self
            .deregister_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_deregister.load(Ordering::SeqCst) {
            return Err(RegistryError::Rejected {
                status: 500,
                message: "injected deregister failure".to_string(),
            });
        }
        self.deregistered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(service_id.to_string());
        Ok(())
    }
}

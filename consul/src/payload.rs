//! Request bodies for the Consul agent API.

use order_intake_core::ServiceRegistration;
use serde::Serialize;
use std::time::Duration;

/// Body of `PUT /v1/agent/service/register`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub check: AgentServiceCheck,
}

/// TTL health check attached to the registration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "CheckID")]
    pub check_id: String,
    pub name: String,
    #[serde(rename = "TTL")]
    pub ttl: String,
    pub deregister_critical_service_after: String,
}

impl AgentServiceRegistration {
    pub fn new(registration: &ServiceRegistration, deregister_after: Duration) -> Self {
        Self {
            id: registration.id.clone(),
            name: registration.name.clone(),
            address: registration.address.clone(),
            port: registration.port,
            tags: registration.tags.clone(),
            check: AgentServiceCheck {
                check_id: registration.check_id(),
                name: format!("{} TTL", registration.name),
                ttl: go_duration(registration.ttl),
                deregister_critical_service_after: go_duration(deregister_after),
            },
        }
    }
}

/// Consul parses durations in Go syntax; whole seconds are enough here.
pub fn go_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}

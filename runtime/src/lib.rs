//! # Order Intake Runtime
//!
//! The long-lived parts of the order intake service.
//!
//! - [`Orchestrator`]: placement, lookup, cancellation and listing of orders,
//!   with the per-key attempt ledger and retry ceiling
//! - [`PlaceOrderConsumer`]: the bus subscription loop feeding the orchestrator
//! - [`LivenessReporter`] / [`RegistrationHandle`]: service-registry heartbeat
//!   and single-shot deregistration
//! - [`Supervisor`] / [`ShutdownCoordinator`]: one shutdown path for signals,
//!   fatal errors and unexpected task exits
//! - [`retry`]: exponential backoff
//! - [`metrics`]: counters and the optional Prometheus exporter
//!
//! ## Task layout
//!
//! ```text
//!                    ┌───────────────────────────────┐
//!                    │          Supervisor           │
//!                    │  (signal | Fatal | task exit) │
//!                    └──────┬─────────┬─────────┬────┘
//!                           │         │         │
//!                      consumer   reporter    http
//!                           │                   │
//!                           └──► Orchestrator ◄─┘
//!                                     │
//!                                OrderStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod liveness;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod shutdown;

pub use consumer::PlaceOrderConsumer;
pub use liveness::{DeregisterOnShutdown, LivenessReporter, RegistrationHandle};
pub use orchestrator::{AttemptLedger, Orchestrator, Placement};
pub use order_intake_core::FailureReport;
pub use retry::RetryPolicy;
pub use shutdown::{
    GenericShutdownHandler, ServiceEvent, ServiceEvents, ShutdownCause, ShutdownCoordinator,
    ShutdownHandler, ShutdownReport, Supervisor, wait_for_signal,
};

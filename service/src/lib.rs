//! # Order Service
//!
//! The deployable order intake process: a bus consumer placing orders, an
//! HTTP gateway for queries and cancellation, and registry liveness, all
//! under one supervisor.
//!
//! - [`config`]: environment-driven configuration
//! - [`telemetry`]: logging and Jaeger span export
//! - [`bootstrap`]: startup wiring and the supervised run

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod telemetry;

pub use bootstrap::Application;
pub use config::{Config, ConfigError};

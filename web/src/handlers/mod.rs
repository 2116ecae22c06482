//! HTTP request handlers.

pub mod health;
pub mod orders;

pub use health::{health_check, readiness_check};
pub use orders::{cancel_order, get_order, list_user_orders};

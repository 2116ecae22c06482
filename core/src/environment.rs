//! Injectable environment dependencies.

use chrono::{DateTime, Utc};

/// Clock trait for time-based operations.
///
/// Order timestamps come from a `Clock` so tests can control ordering.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

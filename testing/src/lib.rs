//! # Order Intake Testing
//!
//! In-memory doubles and fixtures for the order intake service.
//!
//! This crate provides:
//! - [`InMemoryOrderStore`] honouring the unique-key and compare-and-swap contract
//! - [`FlakyOrderStore`] for injecting transient, fatal and slow failures
//! - [`InMemoryMessageBus`] with acknowledgement tracking
//! - [`RecordingRegistry`] capturing registry calls
//! - Deterministic clocks and command fixtures
//!
//! ## Example
//!
//! ```ignore
//! use order_intake_testing::{InMemoryOrderStore, sample_command, stepping_clock};
//!
//! #[tokio::test]
//! async fn places_once() {
//!     let store = Arc::new(InMemoryOrderStore::new());
//!     let orchestrator = Orchestrator::new(store.clone())
//!         .with_clock(Arc::new(stepping_clock()));
//!
//!     orchestrator.place_order(sample_command("k1", "u1")).await?;
//!     assert_eq!(store.len().await, 1);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod registry;
pub mod store;

pub use bus::InMemoryMessageBus;
pub use registry::RecordingRegistry;
pub use store::{FlakyOrderStore, InMemoryOrderStore};

use chrono::{DateTime, Duration, Utc};
use order_intake_core::{
    Clock, IdempotencyKey, LineItem, Money, PlaceOrderCommand, UserId,
};
use std::sync::atomic::{AtomicI64, Ordering};

/// Mock clocks for deterministic tests.
pub mod mocks {
    use super::{AtomicI64, Clock, DateTime, Duration, Ordering, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by a fixed step on every read.
    ///
    /// Successive orders get strictly increasing `created_at` values, which
    /// makes ordering assertions exact.
    #[derive(Debug)]
    pub struct SteppingClock {
        base: DateTime<Utc>,
        step_millis: i64,
        ticks: AtomicI64,
    }

    impl SteppingClock {
        /// Create a stepping clock starting at `base`
        #[must_use]
        pub fn new(base: DateTime<Utc>, step: Duration) -> Self {
            Self {
                base,
                step_millis: step.num_milliseconds(),
                ticks: AtomicI64::new(0),
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
            self.base + Duration::milliseconds(tick * self.step_millis)
        }
    }
}

pub use mocks::{FixedClock, SteppingClock};

/// 2025-01-01 00:00:00 UTC
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(epoch())
}

/// Stepping clock starting at [`epoch`], advancing one millisecond per read
#[must_use]
pub fn stepping_clock() -> SteppingClock {
    SteppingClock::new(epoch(), Duration::milliseconds(1))
}

/// `{key, user, items: [{A, 2, 10}]}`
#[must_use]
pub fn sample_command(key: &str, user: &str) -> PlaceOrderCommand {
    PlaceOrderCommand {
        idempotency_key: IdempotencyKey::new(key),
        user_id: UserId::new(user),
        items: vec![LineItem::new("A", 2, Money::from_minor(10))],
    }
}

/// Install a test-friendly tracing subscriber (idempotent).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_stepping_clock_is_strictly_increasing() {
        let clock = stepping_clock();
        let first = clock.now();
        let second = clock.now();
        assert!(second > first);
        assert_eq!(first, epoch());
    }
}

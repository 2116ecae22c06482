//! Error taxonomy for order operations.
//!
//! Store adapters report [`StoreError`]; the orchestrator folds those into
//! [`OrderError`], which is what callers (the consumer and the gateway) see.

use crate::order::{OrderId, OrderStatus};
use thiserror::Error;

/// Errors reported by an [`OrderStore`](crate::store::OrderStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No order with the given id or key
    #[error("Order not found")]
    NotFound,

    /// Uniqueness violation on the idempotency key (or id)
    #[error("Order already exists for idempotency key '{0}'")]
    Duplicate(String),

    /// Conditional write lost: the stored status differs from the expected one
    #[error("Status mismatch: expected {expected}, found {actual}")]
    StatusMismatch {
        /// Status the caller expected
        expected: OrderStatus,
        /// Status currently stored
        actual: OrderStatus,
    },

    /// Store temporarily unavailable (connection refused, pool exhausted, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store call exceeded its deadline
    #[error("Store operation timed out")]
    Timeout,

    /// The store refused the values of this call (bad encoding, check or
    /// length constraint). Retrying with the same data fails the same way.
    #[error("Store rejected the data: {0}")]
    Rejected(String),

    /// Stored data could not be decoded
    #[error("Corrupt order record: {0}")]
    Corrupt(String),

    /// Unrecoverable loss of the store (pool closed, ...)
    #[error("Store lost: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Errors surfaced by orchestrator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Lookup miss
    #[error("Order {0} not found")]
    NotFound(String),

    /// Illegal transition, e.g. cancelling a terminal order
    #[error("Order {id} is {status} and cannot be changed")]
    InvalidState {
        /// Order id
        id: OrderId,
        /// Status observed at the time of the request
        status: OrderStatus,
    },

    /// Uniqueness collision that could not be resolved to an existing order
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Retryable I/O failure
    #[error("Transient failure (attempt {attempt}): {reason}")]
    Transient {
        /// How many attempts have failed for this command so far
        attempt: u32,
        /// Underlying cause
        reason: String,
    },

    /// Deadline exceeded
    #[error("Operation timed out")]
    Timeout,

    /// The store refused the request's values
    #[error("Rejected by the order store: {0}")]
    Rejected(String),

    /// A stored order could not be read back
    #[error("Corrupt order record: {0}")]
    Corrupt(String),

    /// Unrecoverable dependency loss; triggers shutdown
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl OrderError {
    /// Whether the consumer should redeliver the command.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout)
    }

    /// Whether a placement attempt that failed this way counts toward the
    /// retry ceiling.
    #[must_use]
    pub const fn counts_as_attempt(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout | Self::Rejected(_) | Self::Corrupt(_)
        )
    }

    /// Whether the error must be escalated to the shutdown path.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Mapping used by read and cancel paths, where no attempt ledger applies.
impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound(String::new()),
            StoreError::Duplicate(key) => Self::Conflict(key),
            StoreError::StatusMismatch { actual, .. } => Self::Conflict(format!(
                "order changed concurrently (now {actual})"
            )),
            StoreError::Unavailable(reason) => Self::Transient { attempt: 1, reason },
            StoreError::Timeout => Self::Timeout,
            StoreError::Rejected(reason) => Self::Rejected(reason),
            StoreError::Corrupt(reason) => Self::Corrupt(reason),
            StoreError::Fatal(reason) => Self::Fatal(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Timeout.is_transient());
        assert!(!StoreError::NotFound.is_transient());
        assert!(!StoreError::Fatal("gone".into()).is_transient());

        assert!(OrderError::Timeout.is_transient());
        assert!(!OrderError::NotFound("x".into()).is_transient());
        assert!(OrderError::Fatal("gone".into()).is_fatal());
    }

    #[test]
    fn store_errors_fold_into_taxonomy() {
        assert_eq!(
            OrderError::from(StoreError::Timeout),
            OrderError::Timeout
        );
        assert!(matches!(
            OrderError::from(StoreError::Unavailable("refused".into())),
            OrderError::Transient { attempt: 1, .. }
        ));
        assert!(OrderError::from(StoreError::Fatal("closed".into())).is_fatal());
    }

    #[test]
    fn bad_data_is_never_fatal() {
        let rejected = OrderError::from(StoreError::Rejected("invalid byte sequence".into()));
        let corrupt = OrderError::from(StoreError::Corrupt("unknown status 'Lost'".into()));

        for err in [rejected, corrupt] {
            assert!(!err.is_fatal());
            assert!(!err.is_transient());
            assert!(err.counts_as_attempt());
        }
        assert!(!OrderError::Fatal("closed".into()).counts_as_attempt());
        assert!(!OrderError::Conflict("k1".into()).counts_as_attempt());
    }
}

//! Operator-facing record of orders that exhausted their retries.

use crate::order::{IdempotencyKey, OrderId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted once per order recorded as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// Key of the failed command
    pub idempotency_key: IdempotencyKey,
    /// Id the order was recorded under
    pub order_id: OrderId,
    /// Owning user
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Error of the last attempt
    pub last_error: String,
    /// When the order was recorded as failed
    pub at: DateTime<Utc>,
}

//! Core domain types for order intake.
//!
//! Orders are created from place-order commands and progress through a
//! small, one-directional status machine: `Placed → (Cancelled | Failed)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace used to derive order ids from idempotency keys.
const ORDER_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f72_6465_722d_696e_7461_6b65_2d76_3100);

/// Unique identifier for an order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates an `OrderId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Derives the order id for an idempotency key.
    ///
    /// Every delivery of the same command maps to the same id, so retries
    /// and concurrent cancels always address one record.
    #[must_use]
    pub fn for_key(key: &IdempotencyKey) -> Self {
        Self(Uuid::new_v5(&ORDER_ID_NAMESPACE, key.as_str().as_bytes()))
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the user owning an order
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key collapsing duplicate deliveries of one logical command
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Creates a new `IdempotencyKey`
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount in minor currency units (to avoid floating point issues)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a money amount from minor units
    #[must_use]
    pub const fn from_minor(amount: i64) -> Self {
        Self(amount)
    }

    /// Returns the value in minor units
    #[must_use]
    pub const fn minor(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single line item in an order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Product identifier
    #[serde(rename = "productID")]
    pub product_id: String,
    /// Quantity ordered
    pub quantity: u32,
    /// Price per unit
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a new line item
    #[must_use]
    pub fn new(product_id: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Calculates the total price for this line item
    #[must_use]
    pub const fn total(&self) -> Money {
        Money(self.unit_price.0.saturating_mul(self.quantity as i64))
    }
}

/// Status of an order in its lifecycle
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order has been accepted and persisted
    Placed,
    /// Order was cancelled by a caller
    Cancelled,
    /// Order could not be persisted within the retry ceiling
    Failed,
}

impl OrderStatus {
    /// Terminal states admit no further transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Placed, Self::Cancelled | Self::Failed)
        )
    }

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Placed => "Placed",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Placed" => Ok(Self::Placed),
            "Cancelled" => Ok(Self::Cancelled),
            "Failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Owning user
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Line items, in the order they were submitted
    pub items: Vec<LineItem>,
    /// Current status
    pub status: OrderStatus,
    /// Key of the command that created this order
    pub idempotency_key: IdempotencyKey,
    /// When the order was created
    pub created_at: DateTime<Utc>,
    /// When the status last changed
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new order for a command.
    #[must_use]
    pub fn from_command(command: &PlaceOrderCommand, status: OrderStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: OrderId::for_key(&command.idempotency_key),
            user_id: command.user_id.clone(),
            items: command.items.clone(),
            status,
            idempotency_key: command.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of all line item totals
    #[must_use]
    pub fn total(&self) -> Money {
        Money(
            self.items
                .iter()
                .fold(0_i64, |acc, item| acc.saturating_add(item.total().0)),
        )
    }
}

/// Command to place an order, decoded from a bus message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceOrderCommand {
    /// Key used to collapse duplicate deliveries
    pub idempotency_key: IdempotencyKey,
    /// User placing the order
    pub user_id: UserId,
    /// Items to order
    pub items: Vec<LineItem>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn command(key: &str) -> PlaceOrderCommand {
        PlaceOrderCommand {
            idempotency_key: IdempotencyKey::new(key),
            user_id: UserId::new("u1"),
            items: vec![
                LineItem::new("A", 2, Money::from_minor(10)),
                LineItem::new("B", 1, Money::from_minor(5)),
            ],
        }
    }

    #[test]
    fn order_id_is_stable_per_key() {
        let a = OrderId::for_key(&IdempotencyKey::new("k1"));
        let b = OrderId::for_key(&IdempotencyKey::new("k1"));
        let c = OrderId::for_key(&IdempotencyKey::new("k2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn order_id_parses_from_display() {
        let id = OrderId::for_key(&IdempotencyKey::new("k1"));
        let parsed: OrderId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<OrderId>().is_err());
    }

    #[test]
    fn order_total_sums_line_items() {
        let order = Order::from_command(&command("k1"), OrderStatus::Placed, Utc::now());
        assert_eq!(order.total(), Money::from_minor(25));
    }

    #[test]
    fn order_json_uses_wire_field_names() {
        let order = Order::from_command(&command("k1"), OrderStatus::Placed, Utc::now());
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["userID"], "u1");
        assert_eq!(json["status"], "Placed");
        assert_eq!(json["idempotencyKey"], "k1");
        assert_eq!(json["items"][0]["productID"], "A");
        assert_eq!(json["items"][0]["unitPrice"], 10);
    }

    #[test]
    fn status_parses_database_strings() {
        for status in [OrderStatus::Placed, OrderStatus::Cancelled, OrderStatus::Failed] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("Shipped".parse::<OrderStatus>().is_err());
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop_oneof![
            Just(OrderStatus::Placed),
            Just(OrderStatus::Cancelled),
            Just(OrderStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn terminal_states_never_transition(from in any_status(), to in any_status()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn nothing_transitions_back_to_placed(from in any_status()) {
            prop_assert!(!from.can_transition_to(OrderStatus::Placed));
        }
    }
}

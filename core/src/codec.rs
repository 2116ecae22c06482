//! Wire format for place-order messages.
//!
//! Messages are JSON objects:
//!
//! ```json
//! {
//!   "idempotencyKey": "k1",
//!   "userID": "u1",
//!   "items": [{ "productID": "A", "quantity": 2, "unitPrice": 10 }]
//! }
//! ```
//!
//! The short forms `sku`/`qty`/`price` and snake-case `user_id` /
//! `idempotency_key` are accepted too. When the payload carries no key, the
//! bus message id is used instead.

use crate::order::{IdempotencyKey, LineItem, Money, PlaceOrderCommand, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a message could not be turned into a command.
///
/// Every variant is permanent: redelivering the same bytes cannot fix it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not valid JSON for the message shape
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Neither the payload nor the bus supplied an idempotency key
    #[error("Message carries no idempotency key")]
    MissingKey,

    /// Payload decoded but violates a field rule
    #[error("Invalid field '{field}': {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Rule that was violated
        reason: &'static str,
    },
}

impl DecodeError {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingKey => "missing_key",
            Self::Invalid { .. } => "invalid",
        }
    }
}

/// Line item as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLineItem {
    /// Product identifier
    #[serde(rename = "productID", alias = "sku", alias = "product_id")]
    pub product_id: String,
    /// Quantity
    #[serde(alias = "qty")]
    pub quantity: i64,
    /// Unit price in minor units
    #[serde(rename = "unitPrice", alias = "price", alias = "unit_price")]
    pub unit_price: i64,
}

/// Place-order message as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderMessage {
    /// Idempotency key, if the producer supplied one in the body
    #[serde(
        rename = "idempotencyKey",
        alias = "idempotency_key",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub idempotency_key: Option<String>,
    /// Owning user
    #[serde(rename = "userID", alias = "user_id", alias = "userId")]
    pub user_id: String,
    /// Items
    pub items: Vec<WireLineItem>,
}

impl From<&PlaceOrderCommand> for PlaceOrderMessage {
    fn from(command: &PlaceOrderCommand) -> Self {
        Self {
            idempotency_key: Some(command.idempotency_key.as_str().to_string()),
            user_id: command.user_id.as_str().to_string(),
            items: command
                .items
                .iter()
                .map(|item| WireLineItem {
                    product_id: item.product_id.clone(),
                    quantity: i64::from(item.quantity),
                    unit_price: item.unit_price.minor(),
                })
                .collect(),
        }
    }
}

/// Decode and validate a place-order message.
///
/// # Errors
///
/// Returns [`DecodeError`] if the payload is malformed, carries no key, or
/// violates a field rule.
pub fn decode_place_order(
    payload: &[u8],
    message_id: Option<&str>,
) -> Result<PlaceOrderCommand, DecodeError> {
    let message: PlaceOrderMessage =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let key = message
        .idempotency_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| message_id.filter(|id| !id.trim().is_empty()).map(str::to_string))
        .ok_or(DecodeError::MissingKey)?;
    check_text("idempotencyKey", &key)?;
    check_text("userID", &message.user_id)?;
    if message.items.is_empty() {
        return Err(DecodeError::Invalid {
            field: "items",
            reason: "order must contain at least one item",
        });
    }

    let items = message
        .items
        .into_iter()
        .map(|item| {
            check_text("productID", &item.product_id)?;
            let quantity = u32::try_from(item.quantity)
                .ok()
                .filter(|q| *q > 0)
                .ok_or(DecodeError::Invalid {
                    field: "quantity",
                    reason: "must be a positive integer",
                })?;
            if item.unit_price < 0 {
                return Err(DecodeError::Invalid {
                    field: "unitPrice",
                    reason: "must not be negative",
                });
            }
            Ok(LineItem::new(
                item.product_id,
                quantity,
                Money::from_minor(item.unit_price),
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PlaceOrderCommand {
        idempotency_key: IdempotencyKey::new(key),
        user_id: UserId::new(message.user_id),
        items,
    })
}

/// Identifier fields must be non-blank and free of NUL characters, which
/// text columns cannot store.
fn check_text(field: &'static str, value: &str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::Invalid {
            field,
            reason: "must not be empty",
        });
    }
    if value.contains('\0') {
        return Err(DecodeError::Invalid {
            field,
            reason: "must not contain NUL characters",
        });
    }
    Ok(())
}

/// Encode a command in the wire format.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if serialization fails.
pub fn encode_place_order(command: &PlaceOrderCommand) -> Result<Vec<u8>, DecodeError> {
    serde_json::to_vec(&PlaceOrderMessage::from(command))
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

//! # Order Intake Core
//!
//! Domain types and collaborator traits for the order intake service.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - **Domain**: [`Order`], [`OrderStatus`], [`PlaceOrderCommand`] and their ids
//! - **Errors**: the [`OrderError`] taxonomy and the store-level [`StoreError`]
//! - **Codec**: decoding place-order bus messages ([`codec`])
//! - **Seams**: [`OrderStore`], [`MessageBus`], [`ServiceRegistry`], [`Clock`]
//!
//! Adapters for each seam live in their own crates (`postgres`, `redpanda`,
//! `consul`) and in-memory doubles live in the `testing` crate.
//!
//! ## Status machine
//!
//! ```text
//!            ┌────────────► Cancelled
//!   Placed ──┤
//!            └────────────► Failed
//! ```
//!
//! `Placed` is the only non-terminal status.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod codec;
pub mod environment;
pub mod error;
pub mod failure;
pub mod order;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use bus::{BusError, Delivery, DeliveryStream, MessageBus};
pub use codec::{decode_place_order, encode_place_order, DecodeError};
pub use environment::{Clock, SystemClock};
pub use error::{OrderError, StoreError};
pub use failure::FailureReport;
pub use order::{
    IdempotencyKey, LineItem, Money, Order, OrderId, OrderStatus, PlaceOrderCommand, UserId,
};
pub use registry::{RegistryError, ServiceRegistration, ServiceRegistry};
pub use store::OrderStore;

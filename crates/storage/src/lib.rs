//! Persistence and invariant enforcement for carts and orders.
//!
//! - [`Cart`] holds at most one store's items, one entry per product.
//! - [`Order`] is immutable in its items and references once created; only
//!   its [`OrderStatus`] and courier-tracking log change afterwards.
//! - [`CommerceStore`] is implemented in memory and on PostgreSQL; both
//!   apply optimistic version checks and commit cart-to-order conversion
//!   atomically.

pub mod cart;
pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod store;
pub mod version;

pub use cart::{Cart, CartItem, MergeMode};
pub use error::{RuleViolation, StorageError, Result};
pub use memory::InMemoryStore;
pub use order::{
    CourierProcedure, CourierTrackingEntry, DeliveryLocation, Order, OrderItem, OrderStatus,
};
pub use postgres::PostgresStore;
pub use store::{CommerceStore, CommerceStoreExt};
pub use version::Version;

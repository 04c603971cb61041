use common::{OrderId, ProductId, StoreId, UserId};
use thiserror::Error;

use crate::{OrderStatus, Version};

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The cart was modified by another writer since it was read.
    #[error(
        "Concurrency conflict for cart of user {user_id}: expected version {expected}, found {actual}"
    )]
    CartConflict {
        user_id: UserId,
        expected: Version,
        actual: Version,
    },

    /// The order was modified by another writer since it was read.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    OrderConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// An order with the same id already exists.
    #[error("Order already exists: {0}")]
    OrderExists(OrderId),

    /// An order was already created with this idempotency key.
    #[error("Idempotency key '{key}' already used by user {user_id}")]
    DuplicateIdempotencyKey { user_id: UserId, key: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back into the model.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A mutation that would break a cart or order invariant.
///
/// Raised by the model itself before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    #[error("single-store cart: cart holds items from store {cart_store}, not {requested}")]
    ForeignStore {
        cart_store: StoreId,
        requested: StoreId,
    },

    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(u32),

    #[error("quantity overflow for product {0}")]
    QuantityOverflow(ProductId),

    #[error("product {0} is not in the cart")]
    ItemNotFound(ProductId),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("order is {0} and no longer accepts courier tracking")]
    TerminalOrder(OrderStatus),
}

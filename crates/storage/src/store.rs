use async_trait::async_trait;
use common::{OrderId, UserId};

use crate::{Cart, Order, Result, Version};

/// Core trait for cart and order persistence.
///
/// All implementations must be thread-safe (Send + Sync). Writes carry the
/// version the caller read; a mismatch is reported as a conflict rather
/// than silently overwriting another writer's change.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    /// Retrieves the cart of a user, if any.
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Inserts or replaces a cart.
    ///
    /// `expected` is the version the cart was read at; `Version::initial()`
    /// means the cart must not exist yet. Returns the new version.
    async fn save_cart(&self, cart: &Cart, expected: Version) -> Result<Version>;

    /// Deletes the cart of a user. Returns false if there was none.
    async fn delete_cart(&self, user_id: UserId) -> Result<bool>;

    /// Retrieves an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Retrieves the order a user created with the given idempotency key.
    async fn find_order_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Order>>;

    /// Retrieves all orders of a user, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Inserts a new order. Returns the new version.
    async fn insert_order(&self, order: &Order) -> Result<Version>;

    /// Replaces the mutable parts of an order (status, couriers, timestamps).
    ///
    /// Fails with `OrderConflict` if the stored version differs from `expected`.
    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version>;

    /// Inserts `order` and deletes the cart it was built from as one
    /// transaction.
    ///
    /// The cart must still be at `cart_version`; otherwise nothing is
    /// written and `CartConflict` is returned. A reused idempotency key
    /// fails with `DuplicateIdempotencyKey` and leaves the cart intact.
    async fn commit_conversion(&self, order: &Order, cart_version: Version) -> Result<Version>;
}

/// Extension trait providing convenience methods for stores.
#[async_trait]
pub trait CommerceStoreExt: CommerceStore {
    /// Checks if a user currently has a cart.
    async fn has_cart(&self, user_id: UserId) -> Result<bool> {
        Ok(self.get_cart(user_id).await?.is_some())
    }
}

// Blanket implementation for all CommerceStore implementations
impl<T: CommerceStore + ?Sized> CommerceStoreExt for T {}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use tokio::sync::RwLock;

use crate::{Cart, CommerceStore, Order, Result, StorageError, Version};

#[derive(Debug, Default)]
struct State {
    carts: HashMap<UserId, Cart>,
    /// Last version of each deleted cart; a recreated cart continues from it.
    tombstones: HashMap<UserId, Version>,
    orders: HashMap<OrderId, Order>,
}

impl State {
    fn cart_version(&self, user_id: UserId) -> Version {
        self.carts
            .get(&user_id)
            .map(|cart| cart.version)
            .unwrap_or(Version::initial())
    }

    /// Version the next write of this user's cart gets. Never repeats one
    /// handed out before, even across delete and recreate.
    fn next_cart_version(&self, user_id: UserId) -> Version {
        match self.carts.get(&user_id) {
            Some(cart) => cart.version.next(),
            None => self
                .tombstones
                .get(&user_id)
                .copied()
                .unwrap_or(Version::initial())
                .next(),
        }
    }

    fn remove_cart(&mut self, user_id: UserId) -> bool {
        match self.carts.remove(&user_id) {
            Some(cart) => {
                self.tombstones.insert(user_id, cart.version);
                true
            }
            None => false,
        }
    }

    fn key_in_use(&self, order: &Order) -> bool {
        order.idempotency_key.as_ref().is_some_and(|key| {
            self.orders.values().any(|existing| {
                existing.user_id == order.user_id
                    && existing.idempotency_key.as_ref() == Some(key)
            })
        })
    }

    fn check_insertable(&self, order: &Order) -> Result<()> {
        if self.orders.contains_key(&order.id) {
            return Err(StorageError::OrderExists(order.id));
        }
        if self.key_in_use(order) {
            return Err(StorageError::DuplicateIdempotencyKey {
                user_id: order.user_id,
                key: order.idempotency_key.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// In-memory store implementation for testing and single-process hosts.
///
/// Carts and orders share one lock so a conversion is observed either
/// entirely or not at all.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored carts.
    pub async fn cart_count(&self) -> usize {
        self.state.read().await.carts.len()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl CommerceStore for InMemoryStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&user_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart, expected: Version) -> Result<Version> {
        let mut state = self.state.write().await;

        let actual = state.cart_version(cart.user_id);
        if actual != expected {
            return Err(StorageError::CartConflict {
                user_id: cart.user_id,
                expected,
                actual,
            });
        }

        let version = state.next_cart_version(cart.user_id);
        let mut stored = cart.clone();
        stored.version = version;
        state.carts.insert(cart.user_id, stored);
        Ok(version)
    }

    async fn delete_cart(&self, user_id: UserId) -> Result<bool> {
        Ok(self.state.write().await.remove_cart(user_id))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn find_order_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|order| order.user_id == user_id && order.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut state = self.state.write().await;
        state.check_insertable(order)?;

        let mut stored = order.clone();
        stored.version = Version::first();
        state.orders.insert(order.id, stored);
        Ok(Version::first())
    }

    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version> {
        let mut state = self.state.write().await;

        let stored = state
            .orders
            .get_mut(&order.id)
            .ok_or(StorageError::OrderConflict {
                order_id: order.id,
                expected,
                actual: Version::initial(),
            })?;

        if stored.version != expected {
            return Err(StorageError::OrderConflict {
                order_id: order.id,
                expected,
                actual: stored.version,
            });
        }

        stored.status = order.status;
        stored.couriers = order.couriers.clone();
        stored.updated_at = order.updated_at;
        stored.version = expected.next();
        Ok(stored.version)
    }

    async fn commit_conversion(&self, order: &Order, cart_version: Version) -> Result<Version> {
        let mut state = self.state.write().await;

        let actual = state.cart_version(order.user_id);
        if actual != cart_version || actual == Version::initial() {
            return Err(StorageError::CartConflict {
                user_id: order.user_id,
                expected: cart_version,
                actual,
            });
        }
        state.check_insertable(order)?;

        let mut stored = order.clone();
        stored.version = Version::first();
        state.orders.insert(order.id, stored);
        state.remove_cart(order.user_id);
        Ok(Version::first())
    }
}

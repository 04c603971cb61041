//! Order commands.

use common::StoreId;
use serde::Deserialize;
use storage::{CartItem, DeliveryLocation};

/// Command to create an order without going through a cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub store_id: StoreId,
    /// Repeated products are merged by summing quantities.
    pub items: Vec<CartItem>,
    pub delivery_location: DeliveryLocation,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl NewOrder {
    pub fn new(store_id: StoreId, items: Vec<CartItem>, delivery_location: DeliveryLocation) -> Self {
        Self {
            store_id,
            items,
            delivery_location,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

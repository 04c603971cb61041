//! Cart commands.

use common::{ProductId, StoreId};
use serde::Deserialize;
use storage::{CartItem, DeliveryLocation, MergeMode};

/// Command to add or merge an item into the caller's cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertItem {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub mode: MergeMode,
}

impl UpsertItem {
    /// Creates an accumulating upsert without observations.
    pub fn new(store_id: StoreId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            store_id,
            product_id,
            quantity,
            observations: None,
            mode: MergeMode::Accumulate,
        }
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_observations(mut self, observations: impl Into<String>) -> Self {
        self.observations = Some(observations.into());
        self
    }

    pub(crate) fn item(&self) -> CartItem {
        CartItem {
            product_id: self.product_id,
            quantity: self.quantity,
            observations: self.observations.clone(),
        }
    }
}

/// Command to turn the caller's cart into an order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertToOrder {
    pub delivery_location: DeliveryLocation,
    /// Retrying with the same key returns the order created the first time.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ConvertToOrder {
    pub fn new(delivery_location: DeliveryLocation) -> Self {
        Self {
            delivery_location,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

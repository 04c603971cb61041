//! Cart aggregate.

use chrono::{DateTime, Utc};
use common::{ProductId, StoreId, UserId};
use serde::{Deserialize, Serialize};

use crate::{RuleViolation, Version};

/// How a repeated add of the same product is merged into the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Add the new quantity to the existing one.
    #[default]
    Accumulate,
    /// Overwrite the existing quantity.
    Replace,
}

/// An item in a cart. Not addressable outside its cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
}

impl CartItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            observations: None,
        }
    }

    pub fn with_observations(mut self, observations: impl Into<String>) -> Self {
        self.observations = Some(observations.into());
        self
    }

    fn has_observations(&self) -> bool {
        self.observations
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

/// A user's in-progress cart, scoped to a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub user_id: UserId,
    pub store_id: StoreId,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
    /// Version the cart was read at; `Version::initial()` for an unsaved cart.
    #[serde(default)]
    pub version: Version,
}

impl Cart {
    /// Creates an empty, unsaved cart.
    pub fn new(user_id: UserId, store_id: StoreId) -> Self {
        Self {
            user_id,
            store_id,
            items: Vec::new(),
            updated_at: Utc::now(),
            version: Version::initial(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Merges an item into the cart.
    ///
    /// Rejects items for another store and quantities below one. An
    /// existing entry for the product is merged according to `mode`; a
    /// non-empty `observations` value overwrites the stored one.
    pub fn upsert_item(
        &mut self,
        store_id: StoreId,
        item: CartItem,
        mode: MergeMode,
    ) -> Result<(), RuleViolation> {
        if store_id != self.store_id {
            return Err(RuleViolation::ForeignStore {
                cart_store: self.store_id,
                requested: store_id,
            });
        }
        if item.quantity == 0 {
            return Err(RuleViolation::InvalidQuantity(item.quantity));
        }

        let overwrite_observations = item.has_observations();
        match self
            .items
            .iter_mut()
            .find(|existing| existing.product_id == item.product_id)
        {
            Some(existing) => {
                existing.quantity = match mode {
                    MergeMode::Replace => item.quantity,
                    MergeMode::Accumulate => existing
                        .quantity
                        .checked_add(item.quantity)
                        .ok_or(RuleViolation::QuantityOverflow(item.product_id))?,
                };
                if overwrite_observations {
                    existing.observations = item.observations;
                }
            }
            None => self.items.push(item),
        }

        self.touch();
        Ok(())
    }

    /// Removes the entry for a product.
    pub fn remove_item(&mut self, product_id: ProductId) -> Result<CartItem, RuleViolation> {
        let position = self
            .items
            .iter()
            .position(|item| item.product_id == product_id)
            .ok_or(RuleViolation::ItemNotFound(product_id))?;
        let removed = self.items.remove(position);
        self.touch();
        Ok(removed)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

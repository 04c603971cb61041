use chrono::{DateTime, Utc};
use common::{Money, ProductId, StoreId, UserId};
use serde::Serialize;
use storage::Cart;

/// A cart item enriched with live catalog data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub product_id: ProductId,
    /// `None` once the product has left the catalog.
    pub name: Option<String>,
    pub unit_price: Option<Money>,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    pub available: bool,
    pub line_total: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub id: StoreId,
    pub name: Option<String>,
    pub open: bool,
}

/// Read model of a cart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub user_id: UserId,
    pub store: StoreSummary,
    pub items: Vec<CartLineView>,
    /// Sum of the line totals of products still in the catalog.
    pub subtotal: Money,
    pub updated_at: DateTime<Utc>,
}

impl CartView {
    pub fn item(&self, product_id: ProductId) -> Option<&CartLineView> {
        self.items.iter().find(|line| line.product_id == product_id)
    }
}

/// Result of removing an item.
///
/// Removing the last item deletes the cart; callers usually react to that
/// differently from a cart that still has items.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    ItemRemoved(Cart),
    CartCleared,
}

impl RemoveOutcome {
    pub fn is_cleared(&self) -> bool {
        matches!(self, RemoveOutcome::CartCleared)
    }
}

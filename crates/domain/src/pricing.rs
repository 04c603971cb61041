//! Live catalog resolution shared by cart conversion and direct orders.

use common::{ProductId, StoreId};
use storage::{CartItem, OrderItem};

use crate::error::{DomainError, Result};
use crate::ports::{Catalog, ProductInfo, StoreInfo};

/// Looks up a store, failing with `NotFound` if the catalog does not know it.
pub(crate) async fn require_store(catalog: &dyn Catalog, store_id: StoreId) -> Result<StoreInfo> {
    catalog
        .store(store_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("store {store_id}")))
}

/// Looks up a product and checks it is sold by `store_id`.
pub(crate) async fn require_product(
    catalog: &dyn Catalog,
    store_id: StoreId,
    product_id: ProductId,
) -> Result<ProductInfo> {
    let product = catalog
        .product(product_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("product {product_id}")))?;

    if product.store_id != store_id {
        return Err(DomainError::Validation(format!(
            "product {product_id} is not sold by store {store_id}"
        )));
    }
    Ok(product)
}

/// Snapshots `items` into order lines at the current catalog price.
///
/// Every product must still exist, belong to the store and be available.
pub(crate) async fn price_items(
    catalog: &dyn Catalog,
    store_id: StoreId,
    items: &[CartItem],
) -> Result<Vec<OrderItem>> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = require_product(catalog, store_id, item.product_id).await?;
        if !product.available {
            return Err(DomainError::Conflict(format!(
                "product {} ({}) is unavailable",
                product.name, product.id
            )));
        }
        lines.push(OrderItem {
            product_id: product.id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price: product.price,
            observations: item.observations.clone(),
        });
    }
    Ok(lines)
}

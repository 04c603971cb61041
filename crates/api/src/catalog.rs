//! Startup catalog for the in-memory catalog backend.

use domain::{InMemoryCatalog, ProductInfo, StoreInfo};
use serde::Deserialize;

/// Stores and products to load, as read from `CATALOG_FILE`.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub stores: Vec<StoreInfo>,
    #[serde(default)]
    pub products: Vec<ProductInfo>,
}

impl CatalogSeed {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub async fn into_catalog(self) -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        for store in self.stores {
            catalog.add_store(store).await;
        }
        for product in self.products {
            catalog.add_product(product).await;
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Catalog;

    #[tokio::test]
    async fn test_seed_loads_stores_and_products() {
        let raw = r#"{
            "stores": [{
                "id": "5b1e0bd6-8a44-4a0e-bc51-0c4f1e0f6a10",
                "name": "Trattoria",
                "open": true,
                "cityId": 1,
                "zoneId": 4
            }],
            "products": [{
                "id": "a3c1f7de-33a1-4b6e-9b1e-7d8e0f0c2b11",
                "storeId": "5b1e0bd6-8a44-4a0e-bc51-0c4f1e0f6a10",
                "name": "Pizza",
                "price": 1200,
                "available": true
            }]
        }"#;

        let catalog = CatalogSeed::from_json(raw).unwrap().into_catalog().await;
        let product = catalog
            .product("a3c1f7de-33a1-4b6e-9b1e-7d8e0f0c2b11".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.name, "Pizza");
        assert_eq!(product.price.cents(), 1200);
    }

    #[test]
    fn test_empty_seed() {
        let seed = CatalogSeed::from_json("{}").unwrap();
        assert!(seed.stores.is_empty() && seed.products.is_empty());
    }
}

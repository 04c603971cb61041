//! Shared setup for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{CityId, Money, Principal, ProductId, Publication, Role, StoreId, UserId, ZoneId};
use storage::InMemoryStore;
use tokio::sync::Mutex;

use crate::{
    CartService, InMemoryCatalog, OrderService, ProductInfo, Publisher, RolePolicy, StoreInfo,
};

/// Keeps every publication in the order it was handed over. With `stall`
/// set, the first publish sleeps before recording, long enough for a
/// competing request to run.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    pub stall: bool,
    stalled: AtomicBool,
    pub published: Mutex<Vec<Publication>>,
}

impl RecordingPublisher {
    pub fn stalling() -> Self {
        Self {
            stall: true,
            ..Default::default()
        }
    }

    pub async fn events(&self) -> Vec<String> {
        self.published
            .lock()
            .await
            .iter()
            .map(|p| p.event.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, publications: Vec<Publication>) {
        if self.stall && !self.stalled.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.published.lock().await.extend(publications);
    }
}

pub(crate) struct Fixture {
    pub catalog: InMemoryCatalog,
    pub store_backend: InMemoryStore,
    pub store: StoreInfo,
    pub other_store: StoreInfo,
    pub pizza: ProductInfo,
    pub soda: ProductInfo,
    pub ramen: ProductInfo,
    pub client: Principal,
    pub courier: Principal,
    pub staff: Principal,
}

impl Fixture {
    pub async fn new() -> Self {
        let catalog = InMemoryCatalog::new();

        let store = StoreInfo {
            id: StoreId::new(),
            name: "Trattoria".into(),
            open: true,
            city_id: Some(CityId::new(1)),
            zone_id: Some(ZoneId::new(4)),
        };
        let other_store = StoreInfo {
            id: StoreId::new(),
            name: "Noodle Bar".into(),
            open: false,
            city_id: Some(CityId::new(1)),
            zone_id: Some(ZoneId::new(9)),
        };
        let pizza = product(store.id, "Pizza", 1200);
        let soda = product(store.id, "Soda", 250);
        let ramen = product(other_store.id, "Ramen", 1400);

        catalog.add_store(store.clone()).await;
        catalog.add_store(other_store.clone()).await;
        for p in [&pizza, &soda, &ramen] {
            catalog.add_product(p.clone()).await;
        }

        Self {
            catalog,
            store_backend: InMemoryStore::new(),
            store,
            other_store,
            pizza,
            soda,
            ramen,
            client: Principal::client(UserId::new()),
            courier: Principal::courier(UserId::new()),
            staff: Principal::new(UserId::new(), Role::Store),
        }
    }

    pub fn cart_service(&self) -> CartService<InMemoryStore> {
        CartService::new(
            self.store_backend.clone(),
            Arc::new(self.catalog.clone()),
            Arc::new(RolePolicy),
        )
    }

    pub fn order_service(&self) -> OrderService<InMemoryStore> {
        OrderService::new(
            self.store_backend.clone(),
            Arc::new(self.catalog.clone()),
            Arc::new(RolePolicy),
        )
    }
}

fn product(store_id: StoreId, name: &str, cents: i64) -> ProductInfo {
    ProductInfo {
        id: ProductId::new(),
        store_id,
        name: name.into(),
        price: Money::from_cents(cents),
        available: true,
    }
}

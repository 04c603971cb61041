//! Integration tests for the cart transaction engine and order lifecycle.
//!
//! These tests drive the public services the way the HTTP layer does,
//! including concurrent writers against one cart.

use std::sync::Arc;

use common::{CityId, Money, Principal, ProductId, Role, StoreId, UserId, ZoneId};
use domain::{
    CartService, ConvertToOrder, DomainError, InMemoryCatalog, OrderService, ProductInfo,
    RolePolicy, StoreInfo, UpsertItem, events,
};
use futures_util::future::join_all;
use storage::{CourierProcedure, DeliveryLocation, InMemoryStore, MergeMode, OrderStatus};

struct World {
    store: InMemoryStore,
    carts: Arc<CartService<InMemoryStore>>,
    orders: OrderService<InMemoryStore>,
    shop: StoreId,
    burger: ProductInfo,
    fries: ProductInfo,
}

async fn create_world() -> World {
    let catalog = InMemoryCatalog::new();
    let shop = StoreId::new();
    catalog
        .add_store(StoreInfo {
            id: shop,
            name: "Burger Joint".into(),
            open: true,
            city_id: Some(CityId::new(1)),
            zone_id: Some(ZoneId::new(4)),
        })
        .await;

    let burger = ProductInfo {
        id: ProductId::new(),
        store_id: shop,
        name: "Burger".into(),
        price: Money::from_cents(899),
        available: true,
    };
    let fries = ProductInfo {
        id: ProductId::new(),
        store_id: shop,
        name: "Fries".into(),
        price: Money::from_cents(349),
        available: true,
    };
    catalog.add_product(burger.clone()).await;
    catalog.add_product(fries.clone()).await;

    let store = InMemoryStore::new();
    let catalog = Arc::new(catalog);
    World {
        carts: Arc::new(CartService::new(
            store.clone(),
            catalog.clone(),
            Arc::new(RolePolicy),
        )),
        orders: OrderService::new(store.clone(), catalog, Arc::new(RolePolicy)),
        store,
        shop,
        burger,
        fries,
    }
}

fn home() -> DeliveryLocation {
    DeliveryLocation::new(52.52, 13.40, "Unter den Linden 1")
}

mod cart_properties {
    use super::*;

    #[tokio::test]
    async fn accumulate_n_times_gives_n_times_q() {
        let world = create_world().await;
        let user = Principal::client(UserId::new());

        for _ in 0..7 {
            world
                .carts
                .upsert(user, UpsertItem::new(world.shop, world.fries.id, 3))
                .await
                .unwrap();
        }

        let view = world.carts.read(user).await.unwrap().unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].quantity, 21);
        assert_eq!(view.subtotal, Money::from_cents(21 * 349));
    }

    #[tokio::test]
    async fn replace_twice_yields_one_item() {
        let world = create_world().await;
        let user = Principal::client(UserId::new());
        let cmd = UpsertItem::new(world.shop, world.burger.id, 2).with_mode(MergeMode::Replace);

        world.carts.upsert(user, cmd.clone()).await.unwrap();
        world.carts.upsert(user, cmd).await.unwrap();

        let view = world.carts.read(user).await.unwrap().unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn carts_are_per_user() {
        let world = create_world().await;
        let alice = Principal::client(UserId::new());
        let bob = Principal::client(UserId::new());

        world
            .carts
            .upsert(alice, UpsertItem::new(world.shop, world.burger.id, 1))
            .await
            .unwrap();

        assert!(world.carts.read(bob).await.unwrap().is_none());
        assert_eq!(world.store.cart_count().await, 1);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_for_one_user_lose_nothing() {
        let world = create_world().await;
        let user = Principal::client(UserId::new());

        let tasks = (0..32).map(|_| {
            let carts = Arc::clone(&world.carts);
            let product = world.burger.id;
            let shop = world.shop;
            tokio::spawn(async move { carts.upsert(user, UpsertItem::new(shop, product, 1)).await })
        });

        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let view = world.carts.read(user).await.unwrap().unwrap();
        assert_eq!(view.items[0].quantity, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writers_without_a_shared_lock_conflict_instead_of_overwriting() {
        let world = create_world().await;
        let user = Principal::client(UserId::new());

        // A second engine over the same store stands in for another process
        let catalog = InMemoryCatalog::new();
        catalog
            .add_store(StoreInfo {
                id: world.shop,
                name: "Burger Joint".into(),
                open: true,
                city_id: None,
                zone_id: None,
            })
            .await;
        catalog.add_product(world.burger.clone()).await;
        let other = Arc::new(CartService::new(
            world.store.clone(),
            Arc::new(catalog),
            Arc::new(RolePolicy),
        ));

        let tasks = (0..32).map(|i| {
            let carts = if i % 2 == 0 {
                Arc::clone(&world.carts)
            } else {
                Arc::clone(&other)
            };
            let (shop, product) = (world.shop, world.burger.id);
            tokio::spawn(async move { carts.upsert(user, UpsertItem::new(shop, product, 1)).await })
        });

        let mut applied = 0;
        for result in join_all(tasks).await {
            match result.unwrap() {
                Ok(_) => applied += 1,
                Err(DomainError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let view = world.carts.read(user).await.unwrap().unwrap();
        assert!(applied >= 1);
        assert_eq!(view.items[0].quantity, applied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_with_one_key_create_one_order() {
        let world = create_world().await;
        let user = Principal::client(UserId::new());
        world
            .carts
            .upsert(user, UpsertItem::new(world.shop, world.burger.id, 2))
            .await
            .unwrap();

        let tasks = (0..8).map(|_| {
            let carts = Arc::clone(&world.carts);
            tokio::spawn(async move {
                carts
                    .convert_to_order(user, ConvertToOrder::new(home()).with_idempotency_key("tap-1"))
                    .await
            })
        });

        let placements: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(world.store.order_count().await, 1);
        assert_eq!(placements.iter().filter(|p| !p.replayed).count(), 1);
        let id = placements[0].order.id;
        assert!(placements.iter().all(|p| p.order.id == id));
    }
}

mod order_lifecycle {
    use super::*;

    #[tokio::test]
    async fn checkout_to_delivery() {
        let world = create_world().await;
        let user = Principal::client(UserId::new());
        let staff = Principal::new(UserId::new(), Role::Store);
        let courier = Principal::courier(UserId::new());

        world
            .carts
            .upsert(user, UpsertItem::new(world.shop, world.burger.id, 1))
            .await
            .unwrap();
        world
            .carts
            .upsert(user, UpsertItem::new(world.shop, world.fries.id, 2))
            .await
            .unwrap();

        let placement = world
            .carts
            .convert_to_order(user, ConvertToOrder::new(home()))
            .await
            .unwrap();
        let order_id = placement.order.id;
        assert_eq!(placement.order.total, Money::from_cents(899 + 2 * 349));
        assert!(world.carts.read(user).await.unwrap().is_none());

        world
            .orders
            .update_status(staff, order_id, OrderStatus::Confirmed)
            .await
            .unwrap();
        world
            .orders
            .append_courier_tracking(courier, order_id, CourierProcedure::Picked)
            .await
            .unwrap();
        world
            .orders
            .update_status(staff, order_id, OrderStatus::Preparing)
            .await
            .unwrap();
        world
            .orders
            .update_status(courier, order_id, OrderStatus::Delivering)
            .await
            .unwrap();
        let last = world
            .orders
            .update_status(courier, order_id, OrderStatus::Delivered)
            .await
            .unwrap();

        assert_eq!(last.order.status, OrderStatus::Delivered);
        assert!(
            last.publications
                .iter()
                .any(|p| p.event == events::CITY_ORDER_UPDATE)
        );

        // Terminal: nothing else is accepted
        for status in [OrderStatus::Pending, OrderStatus::Cancelled, OrderStatus::Delivering] {
            let result = world.orders.update_status(staff, order_id, status).await;
            assert!(matches!(result, Err(DomainError::Conflict(_))));
        }

        let mine = world.orders.list_mine(user).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].couriers.len(), 1);
    }

    #[tokio::test]
    async fn cancel_from_confirmed() {
        let world = create_world().await;
        let user = Principal::client(UserId::new());
        let admin = Principal::new(UserId::new(), Role::Admin);

        world
            .carts
            .upsert(user, UpsertItem::new(world.shop, world.burger.id, 1))
            .await
            .unwrap();
        let order_id = world
            .carts
            .convert_to_order(user, ConvertToOrder::new(home()))
            .await
            .unwrap()
            .order
            .id;

        world
            .orders
            .update_status(admin, order_id, OrderStatus::Confirmed)
            .await
            .unwrap();
        let change = world
            .orders
            .update_status(admin, order_id, OrderStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(change.order.status, OrderStatus::Cancelled);
        assert_eq!(change.publications[0].payload["status"], "cancelled");
    }
}

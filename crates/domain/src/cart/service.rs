//! Cart service.

use std::sync::Arc;

use common::{Money, Principal, ProductId};
use storage::{Cart, CommerceStore, Order, StorageError, Version};

use crate::error::{DomainError, Result};
use crate::locks::UserLocks;
use crate::order::{Placement, validate_delivery_location, validate_idempotency_key};
use crate::ports::{Action, Authorizer, Catalog, NullPublisher, Publisher, Resource, authorize};
use crate::pricing;

use super::{CartLineView, CartView, ConvertToOrder, RemoveOutcome, StoreSummary, UpsertItem};

/// The cart transaction engine.
///
/// Every mutation for a user runs under that user's lock and is written
/// with the version it was read at. A writer in another process that got
/// there first turns into a `Conflict` rather than a lost update.
pub struct CartService<S: CommerceStore> {
    store: S,
    catalog: Arc<dyn Catalog>,
    authz: Arc<dyn Authorizer>,
    publisher: Arc<dyn Publisher>,
    locks: UserLocks,
}

impl<S: CommerceStore> CartService<S> {
    pub fn new(store: S, catalog: Arc<dyn Catalog>, authz: Arc<dyn Authorizer>) -> Self {
        Self {
            store,
            catalog,
            authz,
            publisher: Arc::new(NullPublisher),
            locks: UserLocks::new(),
        }
    }

    /// Sends the publications of every conversion to `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds an item to the caller's cart or merges it into an existing entry.
    ///
    /// The cart is created on first add. An item for a different store than
    /// the cart's is rejected and the cart is left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn upsert(&self, principal: Principal, cmd: UpsertItem) -> Result<Cart> {
        authorize(self.authz.as_ref(), &principal, Action::Create, Resource::Cart)?;
        if cmd.quantity == 0 {
            return Err(DomainError::Validation(
                "quantity must be at least 1".into(),
            ));
        }

        pricing::require_store(self.catalog.as_ref(), cmd.store_id).await?;
        pricing::require_product(self.catalog.as_ref(), cmd.store_id, cmd.product_id).await?;

        let _guard = self.locks.lock(principal.id).await;

        let (mut cart, expected) = match self.store.get_cart(principal.id).await? {
            Some(cart) => {
                let version = cart.version;
                (cart, version)
            }
            None => (Cart::new(principal.id, cmd.store_id), Version::initial()),
        };

        cart.upsert_item(cmd.store_id, cmd.item(), cmd.mode)?;
        cart.version = self.store.save_cart(&cart, expected).await?;

        metrics::counter!("cart_mutations_total", "op" => "upsert").increment(1);
        tracing::debug!(user_id = %principal.id, items = cart.items.len(), "cart upserted");
        Ok(cart)
    }

    /// Reads the caller's cart with live product and store details.
    ///
    /// Returns `None` when the user has no cart.
    #[tracing::instrument(skip(self))]
    pub async fn read(&self, principal: Principal) -> Result<Option<CartView>> {
        authorize(self.authz.as_ref(), &principal, Action::Read, Resource::Cart)?;

        let Some(cart) = self.store.get_cart(principal.id).await? else {
            return Ok(None);
        };

        let store = self.catalog.store(cart.store_id).await?;
        let mut items = Vec::with_capacity(cart.items.len());
        let mut subtotal = Money::zero();

        for item in &cart.items {
            let product = self.catalog.product(item.product_id).await?;
            let line_total = product.as_ref().map(|p| p.price.multiply(item.quantity));
            subtotal += line_total.unwrap_or_default();

            items.push(CartLineView {
                product_id: item.product_id,
                name: product.as_ref().map(|p| p.name.clone()),
                unit_price: product.as_ref().map(|p| p.price),
                quantity: item.quantity,
                observations: item.observations.clone(),
                available: product.as_ref().is_some_and(|p| p.available),
                line_total,
            });
        }

        Ok(Some(CartView {
            user_id: cart.user_id,
            store: StoreSummary {
                id: cart.store_id,
                name: store.as_ref().map(|s| s.name.clone()),
                open: store.as_ref().is_some_and(|s| s.open),
            },
            items,
            subtotal,
            updated_at: cart.updated_at,
        }))
    }

    /// Removes one product from the caller's cart.
    ///
    /// Removing the last item deletes the cart and reports `CartCleared`.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(
        &self,
        principal: Principal,
        product_id: ProductId,
    ) -> Result<RemoveOutcome> {
        authorize(self.authz.as_ref(), &principal, Action::Delete, Resource::Cart)?;

        let _guard = self.locks.lock(principal.id).await;

        let mut cart = self
            .store
            .get_cart(principal.id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("no cart for user {}", principal.id)))?;
        let expected = cart.version;

        cart.remove_item(product_id)?;
        metrics::counter!("cart_mutations_total", "op" => "remove").increment(1);

        if cart.is_empty() {
            self.store.delete_cart(principal.id).await?;
            tracing::debug!(user_id = %principal.id, "last item removed, cart deleted");
            return Ok(RemoveOutcome::CartCleared);
        }

        cart.version = self.store.save_cart(&cart, expected).await?;
        Ok(RemoveOutcome::ItemRemoved(cart))
    }

    /// Deletes the caller's cart. Returns false if there was none.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, principal: Principal) -> Result<bool> {
        authorize(self.authz.as_ref(), &principal, Action::Delete, Resource::Cart)?;

        let _guard = self.locks.lock(principal.id).await;
        let existed = self.store.delete_cart(principal.id).await?;

        if existed {
            metrics::counter!("cart_mutations_total", "op" => "clear").increment(1);
        }
        Ok(existed)
    }

    /// Converts the caller's cart into a pending order.
    ///
    /// Prices are looked up live. The order insert and the cart delete
    /// commit together, so a failure leaves the cart intact. With an
    /// idempotency key, a retry returns the order the first call created.
    #[tracing::instrument(skip(self))]
    pub async fn convert_to_order(
        &self,
        principal: Principal,
        cmd: ConvertToOrder,
    ) -> Result<Placement> {
        authorize(self.authz.as_ref(), &principal, Action::Create, Resource::Order)?;
        validate_delivery_location(&cmd.delivery_location)?;
        validate_idempotency_key(cmd.idempotency_key.as_deref())?;

        let _guard = self.locks.lock(principal.id).await;

        if let Some(existing) = self.replay(&principal, cmd.idempotency_key.as_deref()).await? {
            tracing::info!(order_id = %existing.id, "idempotent checkout replay");
            return Ok(Placement::replayed(existing));
        }

        let cart = match self.store.get_cart(principal.id).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(DomainError::NotFound("cart is empty".into())),
        };

        let store_info = pricing::require_store(self.catalog.as_ref(), cart.store_id).await?;
        let items = pricing::price_items(self.catalog.as_ref(), cart.store_id, &cart.items).await?;

        let mut order = Order::new(principal.id, cart.store_id, items, cmd.delivery_location)
            .with_region(store_info.city_id, store_info.zone_id)
            .with_idempotency_key(cmd.idempotency_key);

        match self.store.commit_conversion(&order, cart.version).await {
            Ok(version) => order.version = version,
            Err(StorageError::DuplicateIdempotencyKey { key, .. }) => {
                // Another process finished the same checkout first
                let existing = self
                    .replay(&principal, Some(&key))
                    .await?
                    .ok_or_else(|| DomainError::Conflict(format!("idempotency key {key} in use")))?;
                return Ok(Placement::replayed(existing));
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("cart_mutations_total", "op" => "convert").increment(1);
        metrics::counter!("orders_created_total", "source" => "cart").increment(1);
        tracing::info!(
            order_id = %order.id,
            user_id = %principal.id,
            total = %order.total,
            "cart converted to order"
        );

        // Still under the user's lock
        let placement = Placement::created(order);
        self.publisher.publish(placement.publications.clone()).await;
        Ok(placement)
    }

    async fn replay(&self, principal: &Principal, key: Option<&str>) -> Result<Option<Order>> {
        match key {
            Some(key) => Ok(self
                .store
                .find_order_by_idempotency_key(principal.id, key)
                .await?),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::fixtures::{Fixture, RecordingPublisher};
    use common::{Role, UserId};
    use storage::{CommerceStore, DeliveryLocation, MergeMode, OrderStatus};

    fn location() -> DeliveryLocation {
        DeliveryLocation::new(41.39, 2.16, "Passeig de Gracia 43")
    }

    #[tokio::test]
    async fn accumulate_then_convert_scenario() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        let user = fixture.client;

        service
            .upsert(user, UpsertItem::new(fixture.store.id, fixture.pizza.id, 2))
            .await
            .unwrap();
        service
            .upsert(user, UpsertItem::new(fixture.store.id, fixture.pizza.id, 3))
            .await
            .unwrap();

        let view = service.read(user).await.unwrap().unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.item(fixture.pizza.id).unwrap().quantity, 5);

        let placement = service
            .convert_to_order(user, ConvertToOrder::new(location()))
            .await
            .unwrap();

        assert_eq!(placement.order.status, OrderStatus::Pending);
        assert_eq!(placement.order.total, Money::from_cents(1200 * 5));
        assert!(service.read(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn single_store_invariant_leaves_cart_untouched() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        let user = fixture.client;

        service
            .upsert(user, UpsertItem::new(fixture.store.id, fixture.pizza.id, 1))
            .await
            .unwrap();
        let err = service
            .upsert(
                user,
                UpsertItem::new(fixture.other_store.id, fixture.ramen.id, 1),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(err.to_string().contains("single-store cart"));

        let cart = service.store().get_cart(user.id).await.unwrap().unwrap();
        assert_eq!(cart.store_id, fixture.store.id);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.version, Version::first());
    }

    #[tokio::test]
    async fn replace_mode_is_idempotent() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        let cmd = UpsertItem::new(fixture.store.id, fixture.soda.id, 4).with_mode(MergeMode::Replace);

        service.upsert(fixture.client, cmd.clone()).await.unwrap();
        let cart = service.upsert(fixture.client, cmd).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 4);
    }

    #[tokio::test]
    async fn observations_overwrite_only_when_given() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        let base = UpsertItem::new(fixture.store.id, fixture.pizza.id, 1);

        service
            .upsert(fixture.client, base.clone().with_observations("no olives"))
            .await
            .unwrap();
        let cart = service.upsert(fixture.client, base).await.unwrap();

        assert_eq!(cart.items[0].observations.as_deref(), Some("no olives"));
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn upsert_validates_input_against_catalog() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();

        let zero = UpsertItem::new(fixture.store.id, fixture.pizza.id, 0);
        assert!(matches!(
            service.upsert(fixture.client, zero).await,
            Err(DomainError::Validation(_))
        ));

        let unknown = UpsertItem::new(fixture.store.id, ProductId::new(), 1);
        assert!(matches!(
            service.upsert(fixture.client, unknown).await,
            Err(DomainError::NotFound(_))
        ));

        let mismatched = UpsertItem::new(fixture.store.id, fixture.ramen.id, 1);
        assert!(matches!(
            service.upsert(fixture.client, mismatched).await,
            Err(DomainError::Validation(_))
        ));

        assert_eq!(fixture.store_backend.cart_count().await, 0);
    }

    #[tokio::test]
    async fn upsert_requires_cart_permission() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        let cmd = UpsertItem::new(fixture.store.id, fixture.pizza.id, 1);

        let result = service.upsert(fixture.courier, cmd).await;
        assert!(matches!(result, Err(DomainError::Forbidden(_))));
    }

    #[tokio::test]
    async fn read_resolves_live_details() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 2),
            )
            .await
            .unwrap();
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.soda.id, 1),
            )
            .await
            .unwrap();

        fixture
            .catalog
            .set_price(fixture.pizza.id, Money::from_cents(1000))
            .await;
        fixture.catalog.set_available(fixture.soda.id, false).await;

        let view = service.read(fixture.client).await.unwrap().unwrap();
        assert_eq!(view.store.name.as_deref(), Some("Trattoria"));
        assert!(view.store.open);
        assert_eq!(view.subtotal, Money::from_cents(2000 + 250));

        let soda = view.item(fixture.soda.id).unwrap();
        assert!(!soda.available);
        assert_eq!(soda.name.as_deref(), Some("Soda"));
    }

    #[tokio::test]
    async fn read_without_cart_is_none() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        assert!(service.read(fixture.client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removing_last_item_clears_cart() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        for product in [fixture.pizza.id, fixture.soda.id] {
            service
                .upsert(fixture.client, UpsertItem::new(fixture.store.id, product, 1))
                .await
                .unwrap();
        }

        let outcome = service
            .remove_item(fixture.client, fixture.pizza.id)
            .await
            .unwrap();
        match outcome {
            RemoveOutcome::ItemRemoved(cart) => assert_eq!(cart.items.len(), 1),
            RemoveOutcome::CartCleared => panic!("cart still had an item"),
        }

        let outcome = service
            .remove_item(fixture.client, fixture.soda.id)
            .await
            .unwrap();
        assert!(outcome.is_cleared());
        assert!(service.read(fixture.client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removing_missing_item_is_not_found() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();

        let result = service.remove_item(fixture.client, fixture.pizza.id).await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));

        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 1),
            )
            .await
            .unwrap();
        let result = service.remove_item(fixture.client, fixture.soda.id).await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn clear_is_a_no_op_without_cart() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        assert!(!service.clear(fixture.client).await.unwrap());

        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 1),
            )
            .await
            .unwrap();
        assert!(service.clear(fixture.client).await.unwrap());
        assert!(service.read(fixture.client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn converting_empty_cart_is_not_found() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();

        let result = service
            .convert_to_order(fixture.client, ConvertToOrder::new(location()))
            .await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn conversion_uses_price_at_conversion_time() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 2),
            )
            .await
            .unwrap();

        fixture
            .catalog
            .set_price(fixture.pizza.id, Money::from_cents(1500))
            .await;
        let placement = service
            .convert_to_order(fixture.client, ConvertToOrder::new(location()))
            .await
            .unwrap();
        assert_eq!(placement.order.total, Money::from_cents(3000));

        // Later price changes do not touch the order
        fixture
            .catalog
            .set_price(fixture.pizza.id, Money::from_cents(1))
            .await;
        let stored = service
            .store()
            .get_order(placement.order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.total, Money::from_cents(3000));
        assert_eq!(stored.items[0].product_name, "Pizza");
    }

    #[tokio::test]
    async fn unavailable_product_blocks_conversion_and_keeps_cart() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.soda.id, 1),
            )
            .await
            .unwrap();
        fixture.catalog.set_available(fixture.soda.id, false).await;

        let result = service
            .convert_to_order(fixture.client, ConvertToOrder::new(location()))
            .await;
        assert!(matches!(result, Err(DomainError::Conflict(_))));
        assert!(service.read(fixture.client).await.unwrap().is_some());
        assert_eq!(fixture.store_backend.order_count().await, 0);
    }

    #[tokio::test]
    async fn conversion_retry_with_key_does_not_duplicate() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 1),
            )
            .await
            .unwrap();

        let cmd = ConvertToOrder::new(location()).with_idempotency_key("checkout-7");
        let first = service
            .convert_to_order(fixture.client, cmd.clone())
            .await
            .unwrap();
        let retry = service.convert_to_order(fixture.client, cmd).await.unwrap();

        assert!(!first.replayed);
        assert!(retry.replayed);
        assert_eq!(first.order.id, retry.order.id);
        assert_eq!(fixture.store_backend.order_count().await, 1);
    }

    #[tokio::test]
    async fn conversion_publishes_to_client_and_store_rooms() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 1),
            )
            .await
            .unwrap();

        let placement = service
            .convert_to_order(fixture.client, ConvertToOrder::new(location()))
            .await
            .unwrap();

        let events: Vec<_> = placement
            .publications
            .iter()
            .map(|p| p.event.as_str())
            .collect();
        assert_eq!(events, vec![events::ORDER_CREATED, events::NEW_ORDER]);
        assert_eq!(placement.order.zone_id, fixture.store.zone_id);
    }

    #[tokio::test]
    async fn conversion_publishes_once_and_replays_stay_silent() {
        let fixture = Fixture::new().await;
        let publisher = Arc::new(RecordingPublisher::default());
        let service = fixture.cart_service().with_publisher(publisher.clone());
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 1),
            )
            .await
            .unwrap();

        let cmd = ConvertToOrder::new(location()).with_idempotency_key("checkout-1");
        let first = service
            .convert_to_order(fixture.client, cmd.clone())
            .await
            .unwrap();
        let retry = service.convert_to_order(fixture.client, cmd).await.unwrap();

        assert!(retry.replayed);
        assert_eq!(retry.order.id, first.order.id);
        assert_eq!(
            publisher.events().await,
            vec![events::ORDER_CREATED, events::NEW_ORDER]
        );
    }

    #[tokio::test]
    async fn invalid_location_is_rejected_before_touching_cart() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        service
            .upsert(
                fixture.client,
                UpsertItem::new(fixture.store.id, fixture.pizza.id, 1),
            )
            .await
            .unwrap();

        let result = service
            .convert_to_order(
                fixture.client,
                ConvertToOrder::new(DeliveryLocation::new(123.0, 0.0, "Nowhere")),
            )
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(service.read(fixture.client).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn admin_acts_on_own_cart() {
        let fixture = Fixture::new().await;
        let service = fixture.cart_service();
        let admin = Principal::new(UserId::new(), Role::Admin);

        service
            .upsert(admin, UpsertItem::new(fixture.store.id, fixture.pizza.id, 1))
            .await
            .unwrap();
        assert!(service.read(admin).await.unwrap().is_some());
        assert!(service.read(fixture.client).await.unwrap().is_none());
    }
}

//! Order service.

use std::sync::Arc;

use common::{OrderId, Principal, Role};
use storage::{CommerceStore, CourierProcedure, Order, OrderStatus, StorageError};

use crate::error::{DomainError, Result};
use crate::events;
use crate::locks::OrderLocks;
use crate::ports::{Action, Authorizer, Catalog, NullPublisher, Publisher, Resource, authorize};
use crate::pricing;

use super::{
    NewOrder, OrderChange, Placement, validate_delivery_location, validate_idempotency_key,
};

/// Service for creating orders and driving them through their lifecycle.
///
/// Status and tracking updates for one order are serialized in-process and
/// checked against the stored version. Publications go to the publisher
/// before the order's lock is released, so they leave in mutation order.
pub struct OrderService<S: CommerceStore> {
    store: S,
    catalog: Arc<dyn Catalog>,
    authz: Arc<dyn Authorizer>,
    publisher: Arc<dyn Publisher>,
    locks: OrderLocks,
}

impl<S: CommerceStore> OrderService<S> {
    pub fn new(store: S, catalog: Arc<dyn Catalog>, authz: Arc<dyn Authorizer>) -> Self {
        Self {
            store,
            catalog,
            authz,
            publisher: Arc::new(NullPublisher),
            locks: OrderLocks::new(),
        }
    }

    /// Sends the publications of every committed mutation to `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates an order directly from a list of items.
    ///
    /// Prices are resolved from the catalog now and frozen into the order.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, principal: Principal, cmd: NewOrder) -> Result<Placement> {
        authorize(self.authz.as_ref(), &principal, Action::Create, Resource::Order)?;
        validate_delivery_location(&cmd.delivery_location)?;
        validate_idempotency_key(cmd.idempotency_key.as_deref())?;
        if cmd.items.is_empty() {
            return Err(DomainError::Validation(
                "order must contain at least one item".into(),
            ));
        }

        if let Some(key) = cmd.idempotency_key.as_deref() {
            if let Some(existing) = self
                .store
                .find_order_by_idempotency_key(principal.id, key)
                .await?
            {
                tracing::info!(order_id = %existing.id, "idempotent order replay");
                return Ok(Placement::replayed(existing));
            }
        }

        // Merge repeated products the same way a cart would
        let mut basket = storage::Cart::new(principal.id, cmd.store_id);
        for item in cmd.items {
            basket.upsert_item(cmd.store_id, item, storage::MergeMode::Accumulate)?;
        }

        let store_info = pricing::require_store(self.catalog.as_ref(), cmd.store_id).await?;
        let items = pricing::price_items(self.catalog.as_ref(), cmd.store_id, &basket.items).await?;

        let mut order = Order::new(principal.id, cmd.store_id, items, cmd.delivery_location)
            .with_region(store_info.city_id, store_info.zone_id)
            .with_idempotency_key(cmd.idempotency_key);

        let _guard = self.locks.lock(order.id).await;
        match self.store.insert_order(&order).await {
            Ok(version) => order.version = version,
            Err(StorageError::DuplicateIdempotencyKey { user_id, key }) => {
                // Lost a race against a concurrent retry
                let existing = self
                    .store
                    .find_order_by_idempotency_key(user_id, &key)
                    .await?
                    .ok_or_else(|| DomainError::Conflict(format!("idempotency key {key} in use")))?;
                return Ok(Placement::replayed(existing));
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("orders_created_total", "source" => "direct").increment(1);
        tracing::info!(order_id = %order.id, total = %order.total, "order created");

        let placement = Placement::created(order);
        self.publisher.publish(placement.publications.clone()).await;
        Ok(placement)
    }

    /// Gets an order. Clients can only see their own orders.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, principal: Principal, order_id: OrderId) -> Result<Order> {
        authorize(self.authz.as_ref(), &principal, Action::Read, Resource::Order)?;
        let order = self.load(order_id).await?;

        if principal.role == Role::Client && order.user_id != principal.id {
            return Err(DomainError::Forbidden(format!(
                "order {order_id} belongs to another client"
            )));
        }
        Ok(order)
    }

    /// Lists the caller's own orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_mine(&self, principal: Principal) -> Result<Vec<Order>> {
        authorize(self.authz.as_ref(), &principal, Action::Read, Resource::Order)?;
        Ok(self.store.orders_for_user(principal.id).await?)
    }

    /// Moves an order to `status`.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        principal: Principal,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderChange> {
        authorize(self.authz.as_ref(), &principal, Action::Update, Resource::Order)?;

        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load(order_id).await?;
        let from = order.status;

        order.transition_to(status)?;
        order.version = self.store.update_order(&order, order.version).await?;

        metrics::counter!("order_status_updates_total", "status" => status.as_str()).increment(1);
        tracing::info!(%order_id, %from, to = %status, "order status updated");

        let publications = events::status_changed(&order);
        self.publisher.publish(publications.clone()).await;
        Ok(OrderChange {
            order,
            publications,
        })
    }

    /// Appends a courier milestone recorded by the calling courier.
    #[tracing::instrument(skip(self))]
    pub async fn append_courier_tracking(
        &self,
        principal: Principal,
        order_id: OrderId,
        procedure: CourierProcedure,
    ) -> Result<OrderChange> {
        authorize(
            self.authz.as_ref(),
            &principal,
            Action::Create,
            Resource::CourierTracking,
        )?;

        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load(order_id).await?;

        let entry = order.record_courier(principal.id, procedure)?;
        order.version = self.store.update_order(&order, order.version).await?;

        tracing::info!(%order_id, courier_id = %principal.id, ?procedure, "courier tracking appended");

        let publications = events::courier_tracked(&order, &entry);
        self.publisher.publish(publications.clone()).await;
        Ok(OrderChange {
            order,
            publications,
        })
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("order {order_id}")))
    }
}

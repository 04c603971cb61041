//! Ports for the external collaborators the core consumes.
//!
//! The identity layer hands us a [`Principal`](common::Principal); whether
//! its role may act on a resource is answered by an [`Authorizer`]. Prices,
//! availability and store metadata come from a [`Catalog`]. Committed
//! mutations hand their events to a [`Publisher`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CityId, Money, Principal, ProductId, Publication, Role, StoreId, ZoneId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Action half of an authorization question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// Resource half of an authorization question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Cart,
    Order,
    CourierTracking,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cart => "cart",
            Resource::Order => "order",
            Resource::CourierTracking => "courier tracking",
        }
    }
}

/// Yes/no authorization decision for a role, action and resource.
pub trait Authorizer: Send + Sync {
    fn can(&self, role: Role, action: Action, resource: Resource) -> bool;
}

/// Fails with `Forbidden` unless the principal's role may perform `action`.
pub fn authorize(
    authz: &dyn Authorizer,
    principal: &Principal,
    action: Action,
    resource: Resource,
) -> crate::Result<()> {
    if authz.can(principal.role, action, resource) {
        Ok(())
    } else {
        Err(crate::DomainError::Forbidden(format!(
            "role {} may not {} {}",
            principal.role,
            action.as_str(),
            resource.as_str()
        )))
    }
}

/// Static role table.
///
/// - clients: everything on carts, create and read orders
/// - store staff: read and update orders
/// - couriers: read and update orders, create courier tracking
/// - admins: everything
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy;

impl Authorizer for RolePolicy {
    fn can(&self, role: Role, action: Action, resource: Resource) -> bool {
        use Action::*;
        use Resource::*;

        match (role, resource) {
            (Role::Admin, _) => true,
            (Role::Client, Cart) => true,
            (Role::Client, Order) => matches!(action, Create | Read),
            (Role::Store, Order) => matches!(action, Read | Update),
            (Role::Courier, Order) => matches!(action, Read | Update),
            (Role::Courier, CourierTracking) => action == Create,
            _ => false,
        }
    }
}

/// Receives the publications of a committed mutation.
///
/// Services call it while still holding the lock of the cart or order
/// they changed, so two mutations of one order reach the publisher in
/// commit order. The mutation already stands; implementations log their
/// own failures.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, publications: Vec<Publication>);
}

/// Publisher that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

#[async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, _publications: Vec<Publication>) {}
}

/// A product as seen by the catalog at lookup time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub id: ProductId,
    pub store_id: StoreId,
    pub name: String,
    pub price: Money,
    pub available: bool,
}

/// A store as seen by the catalog at lookup time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub id: StoreId,
    pub name: String,
    pub open: bool,
    pub city_id: Option<CityId>,
    pub zone_id: Option<ZoneId>,
}

/// The catalog could not answer.
#[derive(Debug, Error)]
#[error("catalog lookup failed: {0}")]
pub struct CatalogError(pub String);

/// Live product and store lookup.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<ProductInfo>, CatalogError>;

    async fn store(&self, id: StoreId) -> Result<Option<StoreInfo>, CatalogError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, ProductInfo>,
    stores: HashMap<StoreId, StoreInfo>,
}

/// In-memory catalog for tests and the default host.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_store(&self, store: StoreInfo) {
        self.state.write().await.stores.insert(store.id, store);
    }

    pub async fn add_product(&self, product: ProductInfo) {
        self.state.write().await.products.insert(product.id, product);
    }

    /// Changes the live price. Returns false if the product is unknown.
    pub async fn set_price(&self, id: ProductId, price: Money) -> bool {
        match self.state.write().await.products.get_mut(&id) {
            Some(product) => {
                product.price = price;
                true
            }
            None => false,
        }
    }

    /// Returns false if the product is unknown.
    pub async fn set_available(&self, id: ProductId, available: bool) -> bool {
        match self.state.write().await.products.get_mut(&id) {
            Some(product) => {
                product.available = available;
                true
            }
            None => false,
        }
    }

    pub async fn set_open(&self, id: StoreId, open: bool) -> bool {
        match self.state.write().await.stores.get_mut(&id) {
            Some(store) => {
                store.open = open;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, id: ProductId) -> Result<Option<ProductInfo>, CatalogError> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn store(&self, id: StoreId) -> Result<Option<StoreInfo>, CatalogError> {
        Ok(self.state.read().await.stores.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_owns_cart_but_cannot_update_orders() {
        let policy = RolePolicy;
        for action in [Action::Create, Action::Read, Action::Update, Action::Delete] {
            assert!(policy.can(Role::Client, action, Resource::Cart));
        }
        assert!(policy.can(Role::Client, Action::Create, Resource::Order));
        assert!(policy.can(Role::Client, Action::Read, Resource::Order));
        assert!(!policy.can(Role::Client, Action::Update, Resource::Order));
        assert!(!policy.can(Role::Client, Action::Create, Resource::CourierTracking));
    }

    #[test]
    fn staff_and_couriers() {
        let policy = RolePolicy;
        assert!(policy.can(Role::Store, Action::Update, Resource::Order));
        assert!(!policy.can(Role::Store, Action::Create, Resource::Cart));
        assert!(!policy.can(Role::Store, Action::Create, Resource::CourierTracking));

        assert!(policy.can(Role::Courier, Action::Create, Resource::CourierTracking));
        assert!(policy.can(Role::Courier, Action::Update, Resource::Order));
        assert!(!policy.can(Role::Courier, Action::Read, Resource::Cart));
    }

    #[test]
    fn admin_is_allowed_everything() {
        let policy = RolePolicy;
        for resource in [Resource::Cart, Resource::Order, Resource::CourierTracking] {
            assert!(policy.can(Role::Admin, Action::Delete, resource));
        }
    }

    #[test]
    fn authorize_explains_denial() {
        let principal = Principal::new(common::UserId::new(), Role::Store);
        let err = authorize(&RolePolicy, &principal, Action::Create, Resource::Cart).unwrap_err();
        assert_eq!(err.to_string(), "Forbidden: role store may not create cart");
        assert!(authorize(&RolePolicy, &principal, Action::Read, Resource::Order).is_ok());
    }

    #[tokio::test]
    async fn in_memory_catalog_price_changes_are_live() {
        let catalog = InMemoryCatalog::new();
        let product = ProductInfo {
            id: ProductId::new(),
            store_id: StoreId::new(),
            name: "Margherita".into(),
            price: Money::from_cents(900),
            available: true,
        };
        catalog.add_product(product.clone()).await;

        assert!(catalog.set_price(product.id, Money::from_cents(1100)).await);
        let found = catalog.product(product.id).await.unwrap().unwrap();
        assert_eq!(found.price, Money::from_cents(1100));

        assert!(!catalog.set_price(ProductId::new(), Money::zero()).await);
        assert!(catalog.store(StoreId::new()).await.unwrap().is_none());
    }
}

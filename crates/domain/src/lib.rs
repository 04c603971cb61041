//! Domain layer for the marketplace core.
//!
//! This crate provides:
//! - [`CartService`]: the cart transaction engine (upsert, read, remove,
//!   clear, and atomic conversion into an order)
//! - [`OrderService`]: direct order creation and the status / courier
//!   tracking lifecycle
//! - Ports for the external collaborators it consumes: [`Authorizer`],
//!   [`Catalog`] and [`Publisher`]
//! - Event descriptors ([`common::Publication`]) returned by every
//!   successful mutation, ready for the fan-out router

pub mod cart;
pub mod error;
pub mod events;
pub mod locks;
pub mod order;
pub mod ports;
mod pricing;

#[cfg(test)]
mod fixtures;

pub use cart::{
    CartLineView, CartService, CartView, ConvertToOrder, RemoveOutcome, StoreSummary, UpsertItem,
};
pub use error::{DomainError, Result};
pub use locks::{KeyedLocks, OrderLocks, UserLocks};
pub use order::{NewOrder, OrderChange, OrderService, Placement};
pub use ports::{
    Action, Authorizer, Catalog, CatalogError, InMemoryCatalog, NullPublisher, ProductInfo,
    Publisher, Resource, RolePolicy, StoreInfo, authorize,
};

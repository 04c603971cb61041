//! Order lifecycle: direct creation, status transitions and courier
//! tracking.

mod commands;
mod service;

pub use commands::NewOrder;
pub use service::OrderService;

use common::Publication;
use storage::{DeliveryLocation, Order};

use crate::error::{DomainError, Result};

/// Result of creating an order, directly or from a cart.
#[derive(Debug, Clone)]
pub struct Placement {
    pub order: Order,
    /// Empty when `replayed` is true; the original call already emitted them.
    pub publications: Vec<Publication>,
    /// True if an earlier call with the same idempotency key created the order.
    pub replayed: bool,
}

impl Placement {
    pub(crate) fn created(order: Order) -> Self {
        let publications = crate::events::order_placed(&order);
        Self {
            order,
            publications,
            replayed: false,
        }
    }

    pub(crate) fn replayed(order: Order) -> Self {
        Self {
            order,
            publications: Vec::new(),
            replayed: true,
        }
    }
}

/// Result of a status change or courier tracking append.
#[derive(Debug, Clone)]
pub struct OrderChange {
    pub order: Order,
    pub publications: Vec<Publication>,
}

pub(crate) fn validate_delivery_location(location: &DeliveryLocation) -> Result<()> {
    if !location.is_valid() {
        return Err(DomainError::Validation(format!(
            "delivery coordinates out of range: ({}, {})",
            location.latitude, location.longitude
        )));
    }
    if location.address.trim().is_empty() {
        return Err(DomainError::Validation(
            "delivery address is required".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_idempotency_key(key: Option<&str>) -> Result<()> {
    match key {
        Some(key) if key.trim().is_empty() => Err(DomainError::Validation(
            "idempotency key must not be blank".into(),
        )),
        _ => Ok(()),
    }
}

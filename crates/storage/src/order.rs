//! Order aggregate and its status state machine.

use chrono::{DateTime, Utc};
use common::{CityId, Money, OrderId, ProductId, StoreId, UserId, ZoneId};
use serde::{Deserialize, Serialize};

use crate::{RuleViolation, Version};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Preparing ──► Delivering ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order was placed and awaits the store.
    #[default]
    Pending,

    /// The store accepted the order.
    Confirmed,

    /// The store is preparing the order.
    Preparing,

    /// A courier is on the way.
    Delivering,

    /// Order was handed over (terminal state).
    Delivered,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order may move from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (*self, next),
            (Pending, Confirmed)
                | (Confirmed, Preparing)
                | (Preparing, Delivering)
                | (Delivering, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "preparing" => Ok(OrderStatus::Preparing),
            "delivering" => Ok(OrderStatus::Delivering),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// Courier milestone recorded against an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourierProcedure {
    Picked,
    Delivering,
    Delivered,
    Reallocated,
}

/// Append-only courier log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierTrackingEntry {
    pub courier_id: UserId,
    pub procedure: CourierProcedure,
    pub timestamp: DateTime<Utc>,
}

/// Where the order is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

impl DeliveryLocation {
    pub fn new(latitude: f64, longitude: f64, address: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            address: address.into(),
        }
    }

    /// Returns true if the coordinates are within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Item snapshot, copied by value from the cart at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// Unit price resolved at creation time.
    pub unit_price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
}

impl OrderItem {
    /// Returns the total price for this item (quantity * unit_price).
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// An order record.
///
/// Items, total, store and user are fixed at creation. Only `status` and
/// `couriers` change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub store_id: StoreId,
    pub items: Vec<OrderItem>,
    pub total: Money,
    pub status: OrderStatus,
    pub delivery_location: DeliveryLocation,
    pub couriers: Vec<CourierTrackingEntry>,
    /// City of the fulfilling store, used to route courier-fleet events.
    pub city_id: Option<CityId>,
    /// Zone of the fulfilling store, used to route courier-fleet events.
    pub zone_id: Option<ZoneId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub version: Version,
}

impl Order {
    /// Creates a pending order. The total is computed once, here.
    pub fn new(
        user_id: UserId,
        store_id: StoreId,
        items: Vec<OrderItem>,
        delivery_location: DeliveryLocation,
    ) -> Self {
        let now = Utc::now();
        let total = items.iter().map(OrderItem::line_total).sum();
        Self {
            id: OrderId::new(),
            user_id,
            store_id,
            items,
            total,
            status: OrderStatus::Pending,
            delivery_location,
            couriers: Vec::new(),
            city_id: None,
            zone_id: None,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
            version: Version::initial(),
        }
    }

    pub fn with_region(mut self, city_id: Option<CityId>, zone_id: Option<ZoneId>) -> Self {
        self.city_id = city_id;
        self.zone_id = zone_id;
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Returns true once any courier has been recorded against the order.
    pub fn has_courier(&self) -> bool {
        !self.couriers.is_empty()
    }

    /// Returns the courier currently holding the order, if any.
    pub fn current_courier(&self) -> Option<UserId> {
        self.couriers
            .last()
            .filter(|entry| entry.procedure != CourierProcedure::Reallocated)
            .map(|entry| entry.courier_id)
    }

    /// Moves the order to `next`, enforcing the state machine.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), RuleViolation> {
        if !self.status.can_transition_to(next) {
            return Err(RuleViolation::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Appends a courier milestone. Terminal orders are closed to tracking.
    pub fn record_courier(
        &mut self,
        courier_id: UserId,
        procedure: CourierProcedure,
    ) -> Result<CourierTrackingEntry, RuleViolation> {
        if self.status.is_terminal() {
            return Err(RuleViolation::TerminalOrder(self.status));
        }
        let entry = CourierTrackingEntry {
            courier_id,
            procedure,
            timestamp: Utc::now(),
        };
        self.updated_at = entry.timestamp;
        self.couriers.push(entry.clone());
        Ok(entry)
    }
}

//! Order-lifecycle event descriptors.
//!
//! Event names and payload shapes are a wire contract with the clients
//! listening on the rooms; keep them stable.

use common::{Publication, RoomKey};
use serde_json::{Value, json};
use storage::{CourierTrackingEntry, Order};

pub const ORDER_CREATED: &str = "orderCreated";
pub const NEW_ORDER: &str = "newOrder";
pub const ORDER_STATUS_UPDATE: &str = "orderStatusUpdate";
pub const ORDER_UPDATED: &str = "orderUpdated";
pub const CITY_ORDER_UPDATE: &str = "cityOrderUpdate";

/// Rooms of the geography the order is delivered in.
fn region_rooms(order: &Order) -> impl Iterator<Item = RoomKey> {
    order
        .city_id
        .map(RoomKey::City)
        .into_iter()
        .chain(order.zone_id.map(RoomKey::Zone))
}

fn update_data(order: &Order) -> Value {
    json!({
        "status": order.status,
        "storeId": order.store_id,
        "couriers": order.couriers,
        "deliveryLocation": order.delivery_location,
        "updatedAt": order.updated_at,
    })
}

/// Publications for a freshly created order: the full order to its client
/// and to the fulfilling store.
pub fn order_placed(order: &Order) -> Vec<Publication> {
    vec![
        Publication::to_room(
            ORDER_CREATED,
            json!({ "order": order }),
            RoomKey::Client(order.user_id),
        ),
        Publication::to_room(
            NEW_ORDER,
            json!({ "order": order }),
            RoomKey::Store(order.store_id),
        ),
    ]
}

/// Publications for a status transition that already happened on `order`.
///
/// City and zone rooms are only addressed once a courier has been
/// recorded against the order.
pub fn status_changed(order: &Order) -> Vec<Publication> {
    let data = update_data(order);
    let mut publications = vec![
        Publication::to_room(
            ORDER_STATUS_UPDATE,
            json!({ "orderId": order.id, "status": order.status }),
            RoomKey::Client(order.user_id),
        ),
        Publication::to_room(
            ORDER_UPDATED,
            json!({ "orderId": order.id, "data": data }),
            RoomKey::Store(order.store_id),
        ),
    ];

    if order.has_courier() {
        publications.extend(region_rooms(order).map(|room| {
            Publication::to_room(
                CITY_ORDER_UPDATE,
                json!({ "orderId": order.id, "data": data }),
                room,
            )
        }));
    }
    publications
}

/// Publications for a courier milestone appended to `order`.
pub fn courier_tracked(order: &Order, entry: &CourierTrackingEntry) -> Vec<Publication> {
    let mut data = update_data(order);
    data["tracking"] = json!(entry);

    let payload = json!({ "orderId": order.id, "data": data });
    let mut publications = vec![
        Publication::to_room(ORDER_UPDATED, payload.clone(), RoomKey::Client(order.user_id)),
        Publication::to_room(ORDER_UPDATED, payload.clone(), RoomKey::Store(order.store_id)),
    ];
    publications.extend(
        region_rooms(order).map(|room| Publication::to_room(CITY_ORDER_UPDATE, payload.clone(), room)),
    );
    publications
}

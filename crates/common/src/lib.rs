//! Shared types for the marketplace core.
//!
//! Identifier newtypes, money, caller identity and the room/target
//! addressing used by the real-time distribution layer.

mod identity;
mod money;
mod rooms;
mod types;

pub use identity::{Principal, Role};
pub use money::Money;
pub use rooms::{Publication, RoomKey, RoomKeyError, RoomKind, Target};
pub use types::{CityId, ConnectionId, OrderId, ProductId, StoreId, UserId, ZoneId};

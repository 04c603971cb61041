//! Per-role room-join handlers.
//!
//! A join request is a JSON object whose shape depends on the role of the
//! joining user. The table mapping role to handler is built once at
//! startup.

use std::collections::HashMap;

use common::{CityId, Principal, Role, RoomKey, StoreId, UserId, ZoneId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{RealtimeError, Result};

/// Resolves a join request into the rooms to join.
pub type JoinHandler = fn(&Principal, &Value) -> Result<Vec<RoomKey>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientJoin {
    client_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourierJoin {
    city_id: CityId,
    zone_id: ZoneId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreJoin {
    store_id: StoreId,
    #[serde(default)]
    city_id: Option<CityId>,
    #[serde(default)]
    zone_id: Option<ZoneId>,
}

fn parse<T: DeserializeOwned>(role: Role, request: &Value) -> Result<T> {
    T::deserialize(request)
        .map_err(|e| RealtimeError::InvalidJoin(format!("{role} join request: {e}")))
}

impl ClientJoin {
    fn rooms(self, principal: &Principal) -> Result<Vec<RoomKey>> {
        if principal.role == Role::Client && self.client_id != principal.id {
            return Err(RealtimeError::Forbidden(
                "clients can only join their own room".into(),
            ));
        }
        Ok(vec![RoomKey::Client(self.client_id)])
    }
}

impl CourierJoin {
    fn rooms(self) -> Vec<RoomKey> {
        vec![RoomKey::City(self.city_id), RoomKey::Zone(self.zone_id)]
    }
}

impl StoreJoin {
    fn rooms(self) -> Vec<RoomKey> {
        let mut rooms = vec![RoomKey::Store(self.store_id)];
        rooms.extend(self.city_id.map(RoomKey::City));
        rooms.extend(self.zone_id.map(RoomKey::Zone));
        rooms
    }
}

/// `{clientId}`; must be the caller's own id.
pub fn client_join(principal: &Principal, request: &Value) -> Result<Vec<RoomKey>> {
    parse::<ClientJoin>(Role::Client, request)?.rooms(principal)
}

/// `{cityId, zoneId}`
pub fn courier_join(_principal: &Principal, request: &Value) -> Result<Vec<RoomKey>> {
    Ok(parse::<CourierJoin>(Role::Courier, request)?.rooms())
}

/// `{storeId, cityId?, zoneId?}`
pub fn store_join(_principal: &Principal, request: &Value) -> Result<Vec<RoomKey>> {
    Ok(parse::<StoreJoin>(Role::Store, request)?.rooms())
}

/// Any of the three shapes, picked by which ids are present.
pub fn admin_join(principal: &Principal, request: &Value) -> Result<Vec<RoomKey>> {
    if request.get("storeId").is_some() {
        store_join(principal, request)
    } else if request.get("clientId").is_some() {
        client_join(principal, request)
    } else {
        courier_join(principal, request)
    }
}

/// Role to join-handler table.
#[derive(Debug, Clone)]
pub struct JoinHandlers {
    table: HashMap<Role, JoinHandler>,
}

impl JoinHandlers {
    /// An empty table; every join is rejected until handlers are registered.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// The table for the four built-in roles.
    pub fn standard() -> Self {
        let mut handlers = Self::empty();
        handlers.register(Role::Client, client_join);
        handlers.register(Role::Courier, courier_join);
        handlers.register(Role::Store, store_join);
        handlers.register(Role::Admin, admin_join);
        handlers
    }

    pub fn register(&mut self, role: Role, handler: JoinHandler) {
        self.table.insert(role, handler);
    }

    /// Resolves the rooms `principal` asks to join.
    pub fn resolve(&self, principal: &Principal, request: &Value) -> Result<Vec<RoomKey>> {
        let handler = self.table.get(&principal.role).ok_or_else(|| {
            RealtimeError::Forbidden(format!("role {} cannot join rooms", principal.role))
        })?;
        handler(principal, request)
    }
}

impl Default for JoinHandlers {
    fn default() -> Self {
        Self::standard()
    }
}

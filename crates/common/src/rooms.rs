//! Room keys and publication targets.
//!
//! A room is a named broadcast scope identified by `<kind>:<id>`. Rooms have
//! no standing record of their own; they exist while they have members.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CityId, ConnectionId, StoreId, UserId, ZoneId};

/// The kind of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    Client,
    Store,
    City,
    Zone,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Client => "client",
            RoomKind::Store => "store",
            RoomKind::City => "city",
            RoomKind::Zone => "zone",
        }
    }
}

/// Errors produced when parsing a room key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomKeyError {
    #[error("room key '{0}' is missing the ':' separator")]
    MissingSeparator(String),

    #[error("unknown room kind '{0}'")]
    UnknownKind(String),

    #[error("invalid id '{id}' for room kind '{kind}'")]
    InvalidId { kind: &'static str, id: String },
}

/// Key of a broadcast room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RoomKey {
    /// Personal room of a client, `client:<userId>`.
    Client(UserId),
    /// Staff room of a store, `store:<storeId>`.
    Store(StoreId),
    /// Courier fleet of a city, `city:<cityId>`.
    City(CityId),
    /// Courier fleet of a zone, `zone:<zoneId>`.
    Zone(ZoneId),
}

impl RoomKey {
    pub fn kind(&self) -> RoomKind {
        match self {
            RoomKey::Client(_) => RoomKind::Client,
            RoomKey::Store(_) => RoomKind::Store,
            RoomKey::City(_) => RoomKind::City,
            RoomKey::Zone(_) => RoomKind::Zone,
        }
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomKey::Client(id) => write!(f, "client:{id}"),
            RoomKey::Store(id) => write!(f, "store:{id}"),
            RoomKey::City(id) => write!(f, "city:{id}"),
            RoomKey::Zone(id) => write!(f, "zone:{id}"),
        }
    }
}

impl std::str::FromStr for RoomKey {
    type Err = RoomKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| RoomKeyError::MissingSeparator(s.to_string()))?;

        let invalid = |kind: RoomKind| RoomKeyError::InvalidId {
            kind: kind.as_str(),
            id: id.to_string(),
        };

        match kind {
            "client" => id
                .parse()
                .map(RoomKey::Client)
                .map_err(|_| invalid(RoomKind::Client)),
            "store" => id
                .parse()
                .map(RoomKey::Store)
                .map_err(|_| invalid(RoomKind::Store)),
            "city" => id
                .parse()
                .map(RoomKey::City)
                .map_err(|_| invalid(RoomKind::City)),
            "zone" => id
                .parse()
                .map(RoomKey::Zone)
                .map_err(|_| invalid(RoomKind::Zone)),
            other => Err(RoomKeyError::UnknownKind(other.to_string())),
        }
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for RoomKey {
    type Error = RoomKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where a publication is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "TargetRepr", try_from = "TargetRepr")]
pub enum Target {
    /// Every connection joined to the room, on any process.
    Room(RoomKey),
    /// A single connection, wherever it is attached.
    Connection(ConnectionId),
    /// Every connected socket.
    Broadcast,
}

/// Wire shape of a target: `{"room": ...}`, `{"to": ...}` or `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TargetRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room: Option<RoomKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<ConnectionId>,
}

impl From<Target> for TargetRepr {
    fn from(target: Target) -> Self {
        match target {
            Target::Room(room) => TargetRepr {
                room: Some(room),
                to: None,
            },
            Target::Connection(to) => TargetRepr {
                room: None,
                to: Some(to),
            },
            Target::Broadcast => TargetRepr::default(),
        }
    }
}

impl TryFrom<TargetRepr> for Target {
    type Error = String;

    fn try_from(repr: TargetRepr) -> Result<Self, Self::Error> {
        match (repr.room, repr.to) {
            (Some(room), None) => Ok(Target::Room(room)),
            (None, Some(to)) => Ok(Target::Connection(to)),
            (None, None) => Ok(Target::Broadcast),
            (Some(_), Some(_)) => Err("target cannot name both a room and a connection".into()),
        }
    }
}

/// An event ready to be handed to the fan-out router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Wire event name, e.g. `orderStatusUpdate`.
    pub event: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Delivery target.
    pub target: Target,
}

impl Publication {
    pub fn new(event: impl Into<String>, payload: serde_json::Value, target: Target) -> Self {
        Self {
            event: event.into(),
            payload,
            target,
        }
    }

    /// Publication addressed to a single room.
    pub fn to_room(event: impl Into<String>, payload: serde_json::Value, room: RoomKey) -> Self {
        Self::new(event, payload, Target::Room(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_key_display_and_parse() {
        let store = StoreId::new();
        let key = RoomKey::Store(store);
        assert_eq!(key.to_string(), format!("store:{store}"));
        assert_eq!(key.to_string().parse::<RoomKey>().unwrap(), key);

        assert_eq!("city:1".parse::<RoomKey>().unwrap(), RoomKey::City(CityId::new(1)));
        assert_eq!("zone:4".parse::<RoomKey>().unwrap(), RoomKey::Zone(ZoneId::new(4)));
    }

    #[test]
    fn room_key_rejects_malformed_input() {
        assert!(matches!(
            "city".parse::<RoomKey>(),
            Err(RoomKeyError::MissingSeparator(_))
        ));
        assert!(matches!(
            "planet:3".parse::<RoomKey>(),
            Err(RoomKeyError::UnknownKind(_))
        ));
        assert!(matches!(
            "zone:abc".parse::<RoomKey>(),
            Err(RoomKeyError::InvalidId { kind: "zone", .. })
        ));
        assert!("client:42".parse::<RoomKey>().is_err());
    }

    #[test]
    fn target_wire_shape() {
        let room = Target::Room(RoomKey::City(CityId::new(9)));
        assert_eq!(
            serde_json::to_value(room).unwrap(),
            serde_json::json!({"room": "city:9"})
        );
        assert_eq!(
            serde_json::to_value(Target::Broadcast).unwrap(),
            serde_json::json!({})
        );

        let parsed: Target = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(parsed, Target::Broadcast);

        let both = serde_json::json!({"room": "city:9", "to": ConnectionId::new()});
        assert!(serde_json::from_value::<Target>(both).is_err());
    }
}

//! Room membership registry.
//!
//! Rooms have no standing existence: a room appears with its first member
//! and disappears with its last. Each backend keeps a per-connection index
//! so a disconnect can leave every room in one call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ConnectionId, RoomKey};
use tokio::sync::RwLock;

use crate::Result;

/// Shared membership sets, one per room.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Adds `connection` to `room`. Returns false if it was already a member.
    async fn join(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool>;

    /// Removes `connection` from `room`. Returns false if it was not a member.
    async fn leave(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool>;

    /// Removes `connection` from every room and returns the rooms it left.
    async fn leave_all(&self, connection: ConnectionId) -> Result<Vec<RoomKey>>;

    /// Current members of `room`; empty if the room does not exist.
    async fn members(&self, room: &RoomKey) -> Result<HashSet<ConnectionId>>;

    async fn is_member(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool>;

    /// Whether `room` has at least one member on any process.
    async fn is_occupied(&self, room: &RoomKey) -> Result<bool>;

    /// Rooms `connection` currently belongs to.
    async fn rooms_of(&self, connection: ConnectionId) -> Result<Vec<RoomKey>>;

    /// Number of rooms with at least one member.
    async fn room_count(&self) -> Result<usize>;

    /// Records that the process owning this store is alive.
    ///
    /// Only stores shared between processes need this; the default does
    /// nothing.
    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    /// Removes memberships held by processes that have not sent a
    /// heartbeat within `ttl`. Returns how many were removed.
    async fn sweep_stale(&self, _ttl: Duration) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Default)]
struct Memberships {
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<RoomKey>>,
}

impl Memberships {
    fn remove(&mut self, room: &RoomKey, connection: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }
}

/// In-memory membership store for single-process hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMembershipStore {
    state: Arc<RwLock<Memberships>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn join(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool> {
        let mut state = self.state.write().await;
        let added = state.rooms.entry(*room).or_default().insert(connection);
        state
            .by_connection
            .entry(connection)
            .or_default()
            .insert(*room);
        Ok(added)
    }

    async fn leave(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.remove(room, connection);

        if let Some(rooms) = state.by_connection.get_mut(&connection) {
            rooms.remove(room);
            if rooms.is_empty() {
                state.by_connection.remove(&connection);
            }
        }
        Ok(removed)
    }

    async fn leave_all(&self, connection: ConnectionId) -> Result<Vec<RoomKey>> {
        let mut state = self.state.write().await;
        let rooms: Vec<RoomKey> = state
            .by_connection
            .remove(&connection)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();

        for room in &rooms {
            state.remove(room, connection);
        }
        Ok(rooms)
    }

    async fn members(&self, room: &RoomKey) -> Result<HashSet<ConnectionId>> {
        Ok(self
            .state
            .read()
            .await
            .rooms
            .get(room)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_member(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection)))
    }

    async fn is_occupied(&self, room: &RoomKey) -> Result<bool> {
        Ok(self.state.read().await.rooms.contains_key(room))
    }

    async fn rooms_of(&self, connection: ConnectionId) -> Result<Vec<RoomKey>> {
        Ok(self
            .state
            .read()
            .await
            .by_connection
            .get(&connection)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn room_count(&self) -> Result<usize> {
        Ok(self.state.read().await.rooms.len())
    }
}

//! Event fan-out router.
//!
//! Each process runs one router. It owns the sockets connected to this
//! process and a local index of the rooms they joined. A publish is
//! delivered to local sockets first and then forwarded through the
//! [`Broker`] so every other process delivers to its own sockets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ConnectionId, Publication, RoomKey, Target};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Broker, Envelope};
use crate::registry::MembershipStore;
use crate::replay::{Dispatch, DispatchOutcome};
use crate::{RealtimeError, Result};

/// What a socket receives: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub event: String,
    pub data: Value,
}

impl From<&Publication> for OutboundMessage {
    fn from(publication: &Publication) -> Self {
        Self {
            event: publication.event.clone(),
            data: publication.payload.clone(),
        }
    }
}

/// Receiving half handed to the socket task of a connection.
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundMessage>;

#[derive(Debug, Default)]
struct LocalState {
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<OutboundMessage>>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

impl LocalState {
    fn send(&self, connection: &ConnectionId, message: &OutboundMessage) -> bool {
        self.connections
            .get(connection)
            .is_some_and(|sender| sender.send(message.clone()).is_ok())
    }

    fn deliver(&self, publication: &Publication) -> usize {
        let message = OutboundMessage::from(publication);
        match &publication.target {
            Target::Room(room) => self.rooms.get(room).map_or(0, |members| {
                members
                    .iter()
                    .filter(|connection| self.send(connection, &message))
                    .count()
            }),
            Target::Connection(connection) => usize::from(self.send(connection, &message)),
            Target::Broadcast => self
                .connections
                .keys()
                .filter(|connection| self.send(connection, &message))
                .count(),
        }
    }

    fn forget_room(&mut self, room: &RoomKey, connection: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&connection);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Per-process fan-out router.
pub struct FanoutRouter {
    origin: Uuid,
    local: RwLock<LocalState>,
    registry: Arc<dyn MembershipStore>,
    broker: Arc<dyn Broker>,
    /// Next sequence number. Held for the whole publish so local delivery
    /// and broker forwarding happen in the same order.
    sequence: Mutex<u64>,
}

impl FanoutRouter {
    pub fn new(registry: Arc<dyn MembershipStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            origin: Uuid::new_v4(),
            local: RwLock::new(LocalState::default()),
            registry,
            broker,
            sequence: Mutex::new(0),
        }
    }

    /// Identifier of this process on the broker.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn registry(&self) -> &Arc<dyn MembershipStore> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Registers a new socket and returns its id and message receiver.
    pub async fn connect(&self) -> (ConnectionId, OutboundReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = ConnectionId::new();

        let mut local = self.local.write().await;
        local.connections.insert(connection, sender);
        metrics::gauge!("realtime_connections").set(local.connections.len() as f64);

        tracing::debug!(%connection, "connection registered");
        (connection, receiver)
    }

    /// Removes a socket from this process and from every room it joined.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<Vec<RoomKey>> {
        {
            let mut local = self.local.write().await;
            local.connections.remove(&connection);
            local.rooms.retain(|_, members| {
                members.remove(&connection);
                !members.is_empty()
            });
            metrics::gauge!("realtime_connections").set(local.connections.len() as f64);
        }

        let rooms = self.registry.leave_all(connection).await?;
        tracing::debug!(%connection, rooms = rooms.len(), "connection removed");
        Ok(rooms)
    }

    /// Joins a local connection to `room`. Returns false if already joined.
    ///
    /// If the shared registry rejects the join, the local index is rolled
    /// back so the connection is a member everywhere or nowhere.
    pub async fn join(&self, connection: ConnectionId, room: RoomKey) -> Result<bool> {
        let newly_local = {
            let mut local = self.local.write().await;
            if !local.connections.contains_key(&connection) {
                return Err(RealtimeError::UnknownConnection(connection));
            }
            local.rooms.entry(room).or_default().insert(connection)
        };

        match self.registry.join(&room, connection).await {
            Ok(joined) => Ok(joined),
            Err(e) => {
                if newly_local {
                    self.local.write().await.forget_room(&room, connection);
                }
                Err(e)
            }
        }
    }

    pub async fn leave(&self, connection: ConnectionId, room: RoomKey) -> Result<bool> {
        self.local.write().await.forget_room(&room, connection);
        self.registry.leave(&room, connection).await
    }

    /// Sends `message` to one socket on this process only. Returns false if
    /// the socket is not here or has gone away.
    pub async fn send_local(&self, connection: ConnectionId, message: OutboundMessage) -> bool {
        self.local
            .read()
            .await
            .connections
            .get(&connection)
            .is_some_and(|sender| sender.send(message).is_ok())
    }

    /// Number of sockets connected to this process.
    pub async fn connection_count(&self) -> usize {
        self.local.read().await.connections.len()
    }

    /// Publishes to every matching connection on every process.
    ///
    /// Returns the number of local deliveries. A broker failure is logged
    /// and counted; the local deliveries still stand.
    #[tracing::instrument(skip(self, publication), fields(event = %publication.event))]
    pub async fn publish(&self, publication: Publication) -> usize {
        let mut sequence = self.sequence.lock().await;
        *sequence += 1;

        let delivered = self.local.read().await.deliver(&publication);
        metrics::counter!("events_published_total", "event" => publication.event.clone())
            .increment(1);

        let envelope = Envelope {
            origin: self.origin,
            sequence: *sequence,
            publication,
        };
        if let Err(e) = self.broker.publish(&envelope).await {
            metrics::counter!("broker_publish_failures_total").increment(1);
            tracing::warn!(
                error = %e,
                sequence = envelope.sequence,
                "broker publish failed; other processes will miss this event"
            );
        }

        delivered
    }

    /// Delivers an envelope from another process to local sockets.
    pub async fn deliver_remote(&self, envelope: &Envelope) -> usize {
        if envelope.origin == self.origin {
            return 0;
        }
        self.local.read().await.deliver(&envelope.publication)
    }

    /// Drops connections whose socket task has gone away without a
    /// disconnect. Returns how many were reaped.
    pub async fn reap_closed(&self) -> Result<usize> {
        let closed: Vec<ConnectionId> = self
            .local
            .read()
            .await
            .connections
            .iter()
            .filter(|(_, sender)| sender.is_closed())
            .map(|(connection, _)| *connection)
            .collect();

        for connection in &closed {
            self.disconnect(*connection).await?;
        }
        if !closed.is_empty() {
            tracing::info!(reaped = closed.len(), "reaped closed connections");
        }
        Ok(closed.len())
    }

    /// Refreshes this process's heartbeat in the shared registry, then
    /// removes memberships of processes silent for longer than `ttl`.
    pub async fn sweep_stale(&self, ttl: Duration) -> Result<usize> {
        self.registry.heartbeat().await?;
        let removed = self.registry.sweep_stale(ttl).await?;
        if removed > 0 {
            metrics::counter!("stale_memberships_swept_total").increment(removed as u64);
            tracing::info!(removed, "swept memberships of dead processes");
        }
        Ok(removed)
    }

    /// Subscribes to the broker and spawns the task that delivers other
    /// processes' envelopes locally, until `shutdown` flips to true.
    ///
    /// The subscription is in place when this returns.
    pub async fn start_listener(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let mut stream = self.broker.subscribe().await?;
        let router = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut last_seen: HashMap<Uuid, u64> = HashMap::new();

            loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(Ok(envelope)) => {
                            if envelope.origin == router.origin {
                                continue;
                            }
                            let previous = last_seen.insert(envelope.origin, envelope.sequence);
                            if let Some(previous) = previous {
                                if envelope.sequence != previous + 1 {
                                    tracing::warn!(
                                        origin = %envelope.origin,
                                        expected = previous + 1,
                                        got = envelope.sequence,
                                        "gap in envelope sequence"
                                    );
                                }
                            }
                            router.deliver_remote(&envelope).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "broker subscription error");
                        }
                        None => {
                            tracing::warn!("broker subscription closed");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("fan-out listener stopped");
                            break;
                        }
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl Dispatch for FanoutRouter {
    async fn dispatch(&self, publication: &Publication) -> Result<DispatchOutcome> {
        self.publish(publication.clone()).await;
        Ok(DispatchOutcome::Delivered)
    }
}

//! Socket-facing entry point of the realtime layer.
//!
//! Ties the fan-out router, the join-handler table and the replay queue
//! together: joins go through the handlers, publications for rooms nobody
//! has joined are parked on the queue, and every successful join drains it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ConnectionId, Principal, Publication, RoomKey, Target};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::handlers::JoinHandlers;
use crate::replay::{self, Dispatch, DispatchOutcome, DrainReport, PendingEvent, ReplayQueue};
use crate::router::{FanoutRouter, OutboundMessage, OutboundReceiver};
use crate::Result;

/// What happened to a durable publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the router; carries the number of local deliveries.
    Published(usize),
    /// Parked on the replay queue under this sequence.
    Queued(i64),
}

/// Dispatcher used by drains: publishes events whose room has members and
/// defers the rest.
struct RoomAwareDispatch {
    router: Arc<FanoutRouter>,
}

#[async_trait]
impl Dispatch for RoomAwareDispatch {
    async fn dispatch(&self, publication: &Publication) -> Result<DispatchOutcome> {
        if let Target::Room(room) = &publication.target {
            if !self.router.registry().is_occupied(room).await? {
                return Ok(DispatchOutcome::Deferred);
            }
        }
        self.router.publish(publication.clone()).await;
        Ok(DispatchOutcome::Delivered)
    }
}

#[derive(Clone)]
pub struct Gateway {
    router: Arc<FanoutRouter>,
    handlers: Arc<JoinHandlers>,
    queue: Arc<dyn ReplayQueue>,
}

impl Gateway {
    pub fn new(router: Arc<FanoutRouter>, handlers: JoinHandlers, queue: Arc<dyn ReplayQueue>) -> Self {
        Self {
            router,
            handlers: Arc::new(handlers),
            queue,
        }
    }

    pub fn router(&self) -> &Arc<FanoutRouter> {
        &self.router
    }

    pub fn queue(&self) -> &Arc<dyn ReplayQueue> {
        &self.queue
    }

    fn dispatcher(&self) -> RoomAwareDispatch {
        RoomAwareDispatch {
            router: Arc::clone(&self.router),
        }
    }

    pub async fn connect(&self) -> (ConnectionId, OutboundReceiver) {
        self.router.connect().await
    }

    /// Resolves `request` through the caller's join handler, joins every
    /// room it names and drains the replay queue.
    ///
    /// A rejected request joins nothing. A failed drain is logged; the
    /// join itself still stands.
    #[tracing::instrument(skip(self, request), fields(role = %principal.role))]
    pub async fn join(
        &self,
        principal: &Principal,
        connection: ConnectionId,
        request: &Value,
    ) -> Result<Vec<RoomKey>> {
        let rooms = self.handlers.resolve(principal, request)?;
        for room in &rooms {
            self.router.join(connection, *room).await?;
        }
        tracing::debug!(%connection, rooms = rooms.len(), "joined rooms");

        if let Err(e) = self.drain().await {
            tracing::warn!(error = %e, "replay drain after join failed");
        }
        Ok(rooms)
    }

    pub async fn leave(&self, connection: ConnectionId, room: RoomKey) -> Result<bool> {
        self.router.leave(connection, room).await
    }

    pub async fn disconnect(&self, connection: ConnectionId) -> Result<Vec<RoomKey>> {
        self.router.disconnect(connection).await
    }

    /// Answers one socket on this process directly. Skips the broker and
    /// the publish sequence. Returns false if the socket is gone.
    pub async fn reply(&self, connection: ConnectionId, message: OutboundMessage) -> bool {
        self.router.send_local(connection, message).await
    }

    /// Fire-and-forget publish; nobody listening means nobody receives it.
    pub async fn publish(&self, publication: Publication) -> usize {
        self.router.publish(publication).await
    }

    /// Publishes, or parks the publication on the replay queue when its
    /// room has no members on any process.
    #[tracing::instrument(skip(self, publication), fields(event = %publication.event))]
    pub async fn publish_durable(&self, publication: Publication) -> Result<Delivery> {
        if let Target::Room(room) = &publication.target {
            if !self.router.registry().is_occupied(room).await? {
                let sequence = self.queue.enqueue(&publication).await?;
                metrics::counter!("replay_events_enqueued_total").increment(1);
                tracing::debug!(%room, sequence, "room empty, event queued");
                return Ok(Delivery::Queued(sequence));
            }
        }
        Ok(Delivery::Published(self.router.publish(publication).await))
    }

    /// Publishes a batch durably, in order.
    pub async fn publish_all(&self, publications: Vec<Publication>) -> Result<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(publications.len());
        for publication in publications {
            deliveries.push(self.publish_durable(publication).await?);
        }
        Ok(deliveries)
    }

    /// Drains the replay queue once. Events for rooms that are still empty
    /// go back on the queue ahead of anything queued since.
    pub async fn drain(&self) -> Result<DrainReport> {
        replay::drain_all(self.queue.as_ref(), &self.dispatcher()).await
    }

    /// Queue contents, oldest first, without consuming them.
    pub async fn peek(&self) -> Result<Vec<PendingEvent>> {
        self.queue.peek_all().await
    }

    /// Drains every `interval` until `shutdown` flips to true.
    pub fn spawn_periodic_drain(
        &self,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        replay::spawn_periodic_drain(
            Arc::clone(&self.queue),
            Arc::new(self.dispatcher()),
            interval,
            shutdown,
        )
    }
}

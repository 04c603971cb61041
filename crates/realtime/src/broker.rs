//! Cross-process broadcast of publications.

use std::pin::Pin;

use async_trait::async_trait;
use common::Publication;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{RealtimeError, Result};

/// Default capacity of the in-memory broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A publication as it travels between processes.
///
/// `sequence` increases by one per publish on the origin process, so a
/// subscriber can tell whether it missed anything from that origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Uuid,
    pub sequence: u64,
    pub publication: Publication,
}

/// A stream of envelopes from every process, including our own.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Envelope>> + Send>>;

/// Shared broadcast primitive beneath the per-process routers.
///
/// Implementations must preserve the order of envelopes published by one
/// process. No order is promised across processes.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<()>;

    /// Subscribes to all envelopes published after this call returns.
    async fn subscribe(&self) -> Result<EnvelopeStream>;
}

/// Broker backed by a tokio broadcast channel.
///
/// Clones share the channel, so several routers handed clones of one
/// broker behave like several processes on one bus.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    sender: broadcast::Sender<Envelope>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        // No subscribers is not an error: nobody else is listening
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<EnvelopeStream> {
        let receiver = self.sender.subscribe();
        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(envelope) => Some((Ok(envelope), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Some((Err(RealtimeError::Lagged(skipped)), receiver))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(Box::pin(stream))
    }
}

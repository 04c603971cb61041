//! HTTP and WebSocket handlers.

pub mod cart;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod replay;
pub mod ws;

use async_trait::async_trait;
use common::Publication;
use domain::Publisher;
use realtime::Gateway;

/// Hands the publications of committed mutations to the realtime layer.
///
/// The services call it while they still hold the order's or user's lock.
/// The mutation already stands, so a failure here is logged rather than
/// returned to the caller.
#[derive(Clone)]
pub struct GatewayPublisher(pub Gateway);

#[async_trait]
impl Publisher for GatewayPublisher {
    async fn publish(&self, publications: Vec<Publication>) {
        if publications.is_empty() {
            return;
        }
        if let Err(e) = self.0.publish_all(publications).await {
            tracing::warn!(error = %e, "failed to hand order events to the realtime layer");
        }
    }
}

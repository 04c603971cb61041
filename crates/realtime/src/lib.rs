//! Real-time distribution of order events.
//!
//! Room membership, a per-process fan-out router with a cross-process
//! broker beneath it, role-based room joins and a best-effort replay
//! queue for events nobody was around to receive.

pub mod broker;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod postgres;
pub mod registry;
pub mod replay;
pub mod router;

pub use broker::{Broker, Envelope, EnvelopeStream, InMemoryBroker};
pub use error::{RealtimeError, Result};
pub use gateway::{Delivery, Gateway};
pub use handlers::{JoinHandler, JoinHandlers};
pub use postgres::{PostgresBroker, PostgresMembershipStore, PostgresReplayQueue};
pub use registry::{InMemoryMembershipStore, MembershipStore};
pub use replay::{
    Dispatch, DispatchOutcome, DrainReport, InMemoryReplayQueue, PendingEvent, ReplayQueue,
    drain_all, spawn_periodic_drain,
};
pub use router::{FanoutRouter, OutboundMessage, OutboundReceiver};

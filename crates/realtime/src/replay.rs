//! Durable replay queue.
//!
//! A best-effort outbox for publications that had nobody to receive them.
//! There is no acknowledgment and no consumer cursor: `pop_all` hands the
//! events over and forgets them, so delivery is at most once.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Publication, Target};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::Result;

/// A queued publication.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    /// Position in the queue; strictly increasing.
    pub sequence: i64,
    #[serde(flatten)]
    pub publication: Publication,
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO queue of pending events.
#[async_trait]
pub trait ReplayQueue: Send + Sync {
    /// Appends a publication. Returns its sequence.
    async fn enqueue(&self, publication: &Publication) -> Result<i64>;

    /// Removes and returns every queued event, oldest first.
    async fn pop_all(&self) -> Result<Vec<PendingEvent>>;

    /// Puts popped events back under their original sequences, so they sit
    /// ahead of anything enqueued after them.
    async fn restore(&self, events: &[PendingEvent]) -> Result<()>;

    /// Returns every queued event without consuming it.
    async fn peek_all(&self) -> Result<Vec<PendingEvent>>;

    async fn len(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
struct QueueState {
    next_sequence: i64,
    events: VecDeque<PendingEvent>,
}

/// In-memory replay queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReplayQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryReplayQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayQueue for InMemoryReplayQueue {
    async fn enqueue(&self, publication: &Publication) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.next_sequence += 1;
        let sequence = state.next_sequence;
        state.events.push_back(PendingEvent {
            sequence,
            publication: publication.clone(),
            enqueued_at: Utc::now(),
        });
        Ok(sequence)
    }

    async fn pop_all(&self) -> Result<Vec<PendingEvent>> {
        Ok(self.state.lock().await.events.drain(..).collect())
    }

    async fn restore(&self, events: &[PendingEvent]) -> Result<()> {
        let mut state = self.state.lock().await;
        for event in events {
            let at = state
                .events
                .partition_point(|queued| queued.sequence < event.sequence);
            if state.events.get(at).is_some_and(|queued| queued.sequence == event.sequence) {
                continue;
            }
            state.events.insert(at, event.clone());
        }
        Ok(())
    }

    async fn peek_all(&self) -> Result<Vec<PendingEvent>> {
        Ok(self.state.lock().await.events.iter().cloned().collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().await.events.len())
    }
}

/// What a dispatcher did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the fan-out router.
    Delivered,
    /// Not deliverable yet; the drain puts it back on the queue.
    Deferred,
}

/// Receives events popped by a drain.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, publication: &Publication) -> Result<DispatchOutcome>;
}

/// Outcome of one drain.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub delivered: usize,
    pub deferred: usize,
    /// Events whose dispatch failed, with the reason. They are not re-queued.
    pub failed: Vec<(PendingEvent, String)>,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.delivered + self.deferred + self.failed.len()
    }
}

/// Pops every queued event and dispatches them in FIFO order.
///
/// A failed dispatch is recorded and the drain moves on to the next event.
/// Once an event for a target is deferred, every later event for that
/// target is held back with it. Deferred events are restored under their
/// original sequences.
#[tracing::instrument(skip_all)]
pub async fn drain_all(queue: &dyn ReplayQueue, dispatcher: &dyn Dispatch) -> Result<DrainReport> {
    let events = queue.pop_all().await?;
    let mut report = DrainReport::default();
    let mut held: HashSet<Target> = HashSet::new();
    let mut deferred = Vec::new();

    for event in events {
        if held.contains(&event.publication.target) {
            deferred.push(event);
            continue;
        }
        match dispatcher.dispatch(&event.publication).await {
            Ok(DispatchOutcome::Delivered) => report.delivered += 1,
            Ok(DispatchOutcome::Deferred) => {
                held.insert(event.publication.target);
                deferred.push(event);
            }
            Err(e) => {
                tracing::warn!(
                    sequence = event.sequence,
                    event = %event.publication.event,
                    error = %e,
                    "replay dispatch failed, event dropped"
                );
                metrics::counter!("replay_dispatch_failures_total").increment(1);
                report.failed.push((event, e.to_string()));
            }
        }
    }

    report.deferred = deferred.len();
    if !deferred.is_empty() {
        if let Err(e) = queue.restore(&deferred).await {
            tracing::error!(error = %e, count = deferred.len(), "failed to restore deferred events");
            return Err(e);
        }
    }

    metrics::counter!("replay_events_drained_total").increment(report.delivered as u64);
    if report.total() > 0 {
        tracing::info!(
            delivered = report.delivered,
            deferred = report.deferred,
            failed = report.failed.len(),
            "replay queue drained"
        );
    }
    Ok(report)
}

/// Drains `queue` every `interval` until `shutdown` flips to true.
pub fn spawn_periodic_drain(
    queue: Arc<dyn ReplayQueue>,
    dispatcher: Arc<dyn Dispatch>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = drain_all(queue.as_ref(), dispatcher.as_ref()).await {
                        tracing::error!(error = %e, "periodic replay drain failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("periodic replay drain stopped");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RealtimeError;
    use common::{RoomKey, StoreId};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn publication(n: u32) -> Publication {
        Publication::to_room("newOrder", json!({ "n": n }), RoomKey::Store(StoreId::new()))
    }

    /// Records every dispatch; fails the ones whose payload `n` is listed.
    #[derive(Default)]
    struct RecordingDispatch {
        fail_on: Vec<u32>,
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Dispatch for RecordingDispatch {
        async fn dispatch(&self, publication: &Publication) -> Result<DispatchOutcome> {
            let n = publication.payload["n"].as_u64().unwrap_or_default() as u32;
            self.seen.lock().await.push(n);
            if self.fail_on.contains(&n) {
                return Err(RealtimeError::Dispatch(format!("socket gone for {n}")));
            }
            Ok(DispatchOutcome::Delivered)
        }
    }

    #[tokio::test]
    async fn fifo_and_peek_does_not_consume() {
        let queue = InMemoryReplayQueue::new();
        for n in 1..=3 {
            queue.enqueue(&publication(n)).await.unwrap();
        }

        let peeked = queue.peek_all().await.unwrap();
        assert_eq!(peeked.len(), 3);
        assert_eq!(queue.len().await.unwrap(), 3);
        assert!(peeked.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let popped = queue.pop_all().await.unwrap();
        assert_eq!(popped, peeked);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drain_continues_past_failures() {
        let queue = InMemoryReplayQueue::new();
        for n in 1..=4 {
            queue.enqueue(&publication(n)).await.unwrap();
        }
        let dispatcher = RecordingDispatch {
            fail_on: vec![2],
            ..Default::default()
        };

        let report = drain_all(&queue, &dispatcher).await.unwrap();

        assert_eq!(*dispatcher.seen.lock().await, vec![1, 2, 3, 4]);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.publication.payload["n"], 2);
        assert!(report.failed[0].1.contains("socket gone"));
        // At most once: the failed event is not put back
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    /// Defers every event for one target, delivers the rest.
    struct DeferTarget {
        target: Target,
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Dispatch for DeferTarget {
        async fn dispatch(&self, publication: &Publication) -> Result<DispatchOutcome> {
            let n = publication.payload["n"].as_u64().unwrap_or_default() as u32;
            self.seen.lock().await.push(n);
            if publication.target == self.target {
                Ok(DispatchOutcome::Deferred)
            } else {
                Ok(DispatchOutcome::Delivered)
            }
        }
    }

    #[tokio::test]
    async fn deferred_events_keep_their_place() {
        let queue = InMemoryReplayQueue::new();
        let waiting = Target::Room(RoomKey::Store(StoreId::new()));
        for n in 1..=2 {
            queue
                .enqueue(&Publication::new("orderUpdated", json!({ "n": n }), waiting))
                .await
                .unwrap();
        }
        queue.enqueue(&publication(3)).await.unwrap();
        let dispatcher = DeferTarget {
            target: waiting,
            seen: Mutex::new(Vec::new()),
        };

        let report = drain_all(&queue, &dispatcher).await.unwrap();
        // Arrives after the drain popped, before it restored
        queue
            .enqueue(&Publication::new("orderUpdated", json!({ "n": 4 }), waiting))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.deferred, 2);
        // The second event for the held target is not offered at all
        assert_eq!(*dispatcher.seen.lock().await, vec![1, 3]);

        let order: Vec<_> = queue
            .peek_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.publication.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(order, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn restore_inserts_by_sequence_and_skips_duplicates() {
        let queue = InMemoryReplayQueue::new();
        for n in 1..=3 {
            queue.enqueue(&publication(n)).await.unwrap();
        }
        let popped = queue.pop_all().await.unwrap();
        queue.enqueue(&publication(4)).await.unwrap();

        queue.restore(&popped[1..]).await.unwrap();
        queue.restore(&popped[..2]).await.unwrap();

        let sequences: Vec<_> = queue
            .peek_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn drain_of_empty_queue_is_empty_report() {
        let queue = InMemoryReplayQueue::new();
        let report = drain_all(&queue, &RecordingDispatch::default()).await.unwrap();
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn pending_event_wire_shape() {
        let event = PendingEvent {
            sequence: 3,
            publication: publication(1),
            enqueued_at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "newOrder");
        assert!(value["target"]["room"].is_string());
        assert_eq!(value["sequence"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_drain_runs_until_shutdown() {
        let queue = Arc::new(InMemoryReplayQueue::new());
        let drained = Arc::new(AtomicUsize::new(0));

        struct Counting(Arc<AtomicUsize>);

        #[async_trait]
        impl Dispatch for Counting {
            async fn dispatch(&self, _: &Publication) -> Result<DispatchOutcome> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(DispatchOutcome::Delivered)
            }
        }

        let (tx, rx) = watch::channel(false);
        let handle = spawn_periodic_drain(
            queue.clone(),
            Arc::new(Counting(drained.clone())),
            Duration::from_secs(30),
            rx,
        );

        queue.enqueue(&publication(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(drained.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

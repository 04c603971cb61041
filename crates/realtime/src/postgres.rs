//! PostgreSQL backends: shared room membership, the replay queue, and a
//! `LISTEN/NOTIFY` broker.
//!
//! Tables are created by the workspace migrations.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use common::{ConnectionId, Publication, RoomKey, Target};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::broker::{Broker, Envelope, EnvelopeStream};
use crate::registry::MembershipStore;
use crate::replay::{PendingEvent, ReplayQueue};
use crate::{RealtimeError, Result};

/// Notification channel used when none is configured.
pub const DEFAULT_CHANNEL: &str = "order_events";

/// Postgres caps a NOTIFY payload just under 8000 bytes.
const MAX_NOTIFY_PAYLOAD: usize = 7999;

/// Stored envelopes older than this are pruned by later publishes.
const STORED_ENVELOPE_RETENTION_SECS: f64 = 600.0;

fn parse_room(raw: String) -> Result<RoomKey> {
    Ok(raw.parse::<RoomKey>()?)
}

/// Membership sets shared by every process on the database.
///
/// Each row carries the id of the process that wrote it. A process that
/// stops heartbeating, because it crashed or was killed, has its rows
/// removed by the next sweep on any live process.
#[derive(Clone)]
pub struct PostgresMembershipStore {
    pool: PgPool,
    origin: Uuid,
}

impl PostgresMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            origin: Uuid::new_v4(),
        }
    }

    /// Process id stamped on this store's rows.
    pub fn origin(&self) -> Uuid {
        self.origin
    }
}

#[async_trait]
impl MembershipStore for PostgresMembershipStore {
    async fn join(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool> {
        // Refresh the heartbeat in the same statement so a sweep can never
        // see a fresh row without a live owner
        let result = sqlx::query(
            r#"
            WITH alive AS (
                INSERT INTO realtime_processes (origin, last_seen) VALUES ($3, NOW())
                ON CONFLICT (origin) DO UPDATE SET last_seen = NOW()
            )
            INSERT INTO room_memberships (room_key, connection_id, origin)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(room.to_string())
        .bind(connection.as_uuid())
        .bind(self.origin)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn leave(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM room_memberships WHERE room_key = $1 AND connection_id = $2")
                .bind(room.to_string())
                .bind(connection.as_uuid())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn leave_all(&self, connection: ConnectionId) -> Result<Vec<RoomKey>> {
        let rooms: Vec<String> = sqlx::query_scalar(
            "DELETE FROM room_memberships WHERE connection_id = $1 RETURNING room_key",
        )
        .bind(connection.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rooms.into_iter().map(parse_room).collect()
    }

    async fn members(&self, room: &RoomKey) -> Result<HashSet<ConnectionId>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT connection_id FROM room_memberships WHERE room_key = $1")
                .bind(room.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(ConnectionId::from_uuid).collect())
    }

    async fn is_member(&self, room: &RoomKey, connection: ConnectionId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM room_memberships WHERE room_key = $1 AND connection_id = $2)",
        )
        .bind(room.to_string())
        .bind(connection.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn is_occupied(&self, room: &RoomKey) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM room_memberships WHERE room_key = $1)",
        )
        .bind(room.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn rooms_of(&self, connection: ConnectionId) -> Result<Vec<RoomKey>> {
        let rooms: Vec<String> =
            sqlx::query_scalar("SELECT room_key FROM room_memberships WHERE connection_id = $1")
                .bind(connection.as_uuid())
                .fetch_all(&self.pool)
                .await?;
        rooms.into_iter().map(parse_room).collect()
    }

    async fn room_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT room_key) FROM room_memberships")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn heartbeat(&self) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO realtime_processes (origin, last_seen) VALUES ($1, NOW())
            ON CONFLICT (origin) DO UPDATE SET last_seen = NOW()
            "#,
        )
        .bind(self.origin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sweep_stale(&self, ttl: Duration) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM room_memberships m
            WHERE NOT EXISTS (
                SELECT 1 FROM realtime_processes p
                WHERE p.origin = m.origin
                  AND p.last_seen > NOW() - make_interval(secs => $1)
            )
            "#,
        )
        .bind(ttl.as_secs_f64())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM realtime_processes WHERE last_seen <= NOW() - make_interval(secs => $1)",
        )
        .bind(ttl.as_secs_f64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(removed.rows_affected() as usize)
    }
}

/// Replay queue stored in the `pending_events` table.
#[derive(Clone)]
pub struct PostgresReplayQueue {
    pool: PgPool,
}

impl PostgresReplayQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: PgRow) -> Result<PendingEvent> {
        let room: Option<String> = row.try_get("room")?;
        let to: Option<Uuid> = row.try_get("to_connection")?;
        let target = match (room, to) {
            (Some(room), None) => Target::Room(parse_room(room)?),
            (None, Some(to)) => Target::Connection(ConnectionId::from_uuid(to)),
            (None, None) => Target::Broadcast,
            (Some(_), Some(_)) => {
                return Err(RealtimeError::CorruptRow(
                    "pending event names both a room and a connection".into(),
                ));
            }
        };

        Ok(PendingEvent {
            sequence: row.try_get("seq")?,
            publication: Publication {
                event: row.try_get("event")?,
                payload: row.try_get("payload")?,
                target,
            },
            enqueued_at: row.try_get("enqueued_at")?,
        })
    }
}

fn target_columns(target: &Target) -> (Option<String>, Option<Uuid>) {
    match target {
        Target::Room(room) => (Some(room.to_string()), None),
        Target::Connection(connection) => (None, Some(connection.as_uuid())),
        Target::Broadcast => (None, None),
    }
}

#[async_trait]
impl ReplayQueue for PostgresReplayQueue {
    async fn enqueue(&self, publication: &Publication) -> Result<i64> {
        let (room, to) = target_columns(&publication.target);

        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO pending_events (event, payload, room, to_connection) VALUES ($1, $2, $3, $4) RETURNING seq",
        )
        .bind(&publication.event)
        .bind(&publication.payload)
        .bind(room)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }

    async fn pop_all(&self) -> Result<Vec<PendingEvent>> {
        // RETURNING has no ORDER BY; sort after the delete
        let rows = sqlx::query(
            "DELETE FROM pending_events RETURNING seq, event, payload, room, to_connection, enqueued_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;
        events.sort_by_key(|event| event.sequence);
        Ok(events)
    }

    async fn restore(&self, events: &[PendingEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            let (room, to) = target_columns(&event.publication.target);
            sqlx::query(
                r#"
                INSERT INTO pending_events (seq, event, payload, room, to_connection, enqueued_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (seq) DO NOTHING
                "#,
            )
            .bind(event.sequence)
            .bind(&event.publication.event)
            .bind(&event.publication.payload)
            .bind(room)
            .bind(to)
            .bind(event.enqueued_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn peek_all(&self) -> Result<Vec<PendingEvent>> {
        let rows = sqlx::query(
            "SELECT seq, event, payload, room, to_connection, enqueued_at FROM pending_events ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

/// Body of one notification on the broker channel.
///
/// Envelopes that fit under the NOTIFY limit travel inline. Larger ones
/// are written to `broker_envelopes` and only their id is sent.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Notice {
    Inline { envelope: Envelope },
    Stored { id: i64 },
}

/// The inline notification for `envelope`, or `None` if it is too large
/// to send inline.
fn inline_notice(envelope: &Envelope) -> Result<Option<String>> {
    let payload = serde_json::to_string(&Notice::Inline {
        envelope: envelope.clone(),
    })?;
    Ok((payload.len() <= MAX_NOTIFY_PAYLOAD).then_some(payload))
}

async fn resolve_notice(pool: &PgPool, payload: &str) -> Result<Envelope> {
    match serde_json::from_str::<Notice>(payload)? {
        Notice::Inline { envelope } => Ok(envelope),
        Notice::Stored { id } => {
            let stored: Option<serde_json::Value> =
                sqlx::query_scalar("SELECT envelope FROM broker_envelopes WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
            let stored = stored.ok_or_else(|| {
                RealtimeError::Broker(format!("stored envelope {id} is gone"))
            })?;
            Ok(serde_json::from_value(stored)?)
        }
    }
}

/// Broker over Postgres `LISTEN/NOTIFY`.
///
/// Postgres delivers notifications in commit order. The router awaits one
/// publish at a time, and the subscription resolves stored envelopes one
/// notification at a time, so envelopes from one process keep their order.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    channel: String,
}

impl PostgresBroker {
    pub fn new(pool: PgPool) -> Self {
        Self::with_channel(pool, DEFAULT_CHANNEL)
    }

    pub fn with_channel(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    async fn publish_stored(&self, envelope: &Envelope) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM broker_envelopes WHERE created_at < NOW() - make_interval(secs => $1)",
        )
        .bind(STORED_ENVELOPE_RETENTION_SECS)
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO broker_envelopes (envelope) VALUES ($1) RETURNING id",
        )
        .bind(serde_json::to_value(envelope)?)
        .fetch_one(&mut *tx)
        .await?;

        // Listeners are notified at commit, when the row is visible
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(serde_json::to_string(&Notice::Stored { id })?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(id, sequence = envelope.sequence, "large envelope sent by reference");
        Ok(())
    }
}

#[async_trait]
impl Broker for PostgresBroker {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let Some(payload) = inline_notice(envelope)? else {
            return self.publish_stored(envelope).await;
        };

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<EnvelopeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;

        let pool = self.pool.clone();
        let stream = listener.into_stream().then(move |notification| {
            let pool = pool.clone();
            async move {
                let notification = notification?;
                resolve_notice(&pool, notification.payload()).await
            }
        });
        Ok(Box::pin(stream))
    }
}

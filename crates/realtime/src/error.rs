//! Realtime error types.

use common::{ConnectionId, RoomKeyError};
use thiserror::Error;

/// Errors that can occur in the distribution layer.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The join request did not match the shape expected for the role.
    #[error("Invalid join request: {0}")]
    InvalidJoin(String),

    /// The caller may not join the requested room.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A room key could not be parsed.
    #[error("Invalid room: {0}")]
    InvalidRoom(#[from] RoomKeyError),

    /// The connection is not registered on this process.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The cross-process broker failed.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The subscriber fell behind and missed envelopes.
    #[error("Subscriber lagged, {0} envelopes skipped")]
    Lagged(u64),

    /// A dispatch during a replay drain failed.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// An underlying database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize or deserialize an envelope or payload.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

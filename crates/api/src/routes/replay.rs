//! Replay queue diagnostics. Admin only.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use realtime::PendingEvent;
use serde::Serialize;
use storage::CommerceStore;

use crate::AppState;
use crate::error::ApiError;
use crate::identity::{Caller, require_admin};

#[derive(Debug, Serialize)]
pub struct FailedEvent {
    pub sequence: i64,
    pub event: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct DrainResponse {
    pub delivered: usize,
    pub deferred: usize,
    pub failed: Vec<FailedEvent>,
}

/// GET /replay: queue contents without consuming them.
pub async fn peek<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
) -> Result<Json<Vec<PendingEvent>>, ApiError> {
    require_admin(&principal)?;
    Ok(Json(state.gateway.peek().await?))
}

/// POST /replay/drain
#[tracing::instrument(skip(state))]
pub async fn drain<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
) -> Result<Json<DrainResponse>, ApiError> {
    require_admin(&principal)?;
    let report = state.gateway.drain().await?;

    Ok(Json(DrainResponse {
        delivered: report.delivered,
        deferred: report.deferred,
        failed: report
            .failed
            .into_iter()
            .map(|(pending, reason)| FailedEvent {
                sequence: pending.sequence,
                event: pending.publication.event,
                reason,
            })
            .collect(),
    }))
}

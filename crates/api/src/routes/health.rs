//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::metrics::ProbeState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    /// Sockets attached to this process.
    pub connections: usize,
    /// `None` when the replay queue could not be read.
    pub pending_events: Option<usize>,
}

/// GET /health
pub async fn check(State(probe): State<ProbeState>) -> Json<HealthResponse> {
    let pending_events = probe.gateway.queue().len().await.ok();
    Json(HealthResponse {
        status: if pending_events.is_some() { "ok" } else { "degraded" },
        connections: probe.gateway.router().connection_count().await,
        pending_events,
    })
}

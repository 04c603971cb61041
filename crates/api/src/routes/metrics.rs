//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use realtime::Gateway;

/// State shared by the probe endpoints.
#[derive(Clone)]
pub struct ProbeState {
    pub metrics: PrometheusHandle,
    pub gateway: Gateway,
}

/// GET /metrics
///
/// Samples the replay queue depth before rendering.
pub async fn get(State(probe): State<ProbeState>) -> impl IntoResponse {
    match probe.gateway.queue().len().await {
        Ok(depth) => ::metrics::gauge!("replay_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "could not sample replay queue depth"),
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        probe.metrics.render(),
    )
}

//! HTTP and WebSocket host for the marketplace core.
//!
//! Exposes the cart and order services over REST and the realtime layer
//! over a WebSocket, with structured logging (tracing) and Prometheus
//! metrics.

pub mod catalog;
pub mod config;
pub mod error;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use domain::{Authorizer, CartService, Catalog, OrderService, Publisher, RolePolicy};
use metrics_exporter_prometheus::PrometheusHandle;
use realtime::{
    FanoutRouter, Gateway, InMemoryBroker, InMemoryMembershipStore, InMemoryReplayQueue,
    JoinHandlers, PostgresBroker, PostgresMembershipStore, PostgresReplayQueue,
};
use sqlx::PgPool;
use storage::CommerceStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::GatewayPublisher;
use routes::metrics::ProbeState;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CommerceStore> {
    pub carts: CartService<S>,
    pub orders: OrderService<S>,
    pub gateway: Gateway,
}

impl<S: CommerceStore + Clone> AppState<S> {
    /// Wires both services to one store, one catalog and the standard
    /// role policy, publishing through `gateway`.
    pub fn new(store: S, catalog: Arc<dyn Catalog>, gateway: Gateway) -> Self {
        let authz: Arc<dyn Authorizer> = Arc::new(RolePolicy);
        let publisher: Arc<dyn Publisher> = Arc::new(GatewayPublisher(gateway.clone()));
        Self {
            carts: CartService::new(store.clone(), Arc::clone(&catalog), Arc::clone(&authz))
                .with_publisher(Arc::clone(&publisher)),
            orders: OrderService::new(store, catalog, authz).with_publisher(publisher),
            gateway,
        }
    }
}

/// Single-process realtime stack: in-memory membership, broker and queue.
pub fn in_memory_gateway() -> Gateway {
    let router = FanoutRouter::new(
        Arc::new(InMemoryMembershipStore::new()),
        Arc::new(InMemoryBroker::new()),
    );
    Gateway::new(
        Arc::new(router),
        JoinHandlers::standard(),
        Arc::new(InMemoryReplayQueue::new()),
    )
}

/// Realtime stack shared through PostgreSQL by every process on `pool`.
pub fn postgres_gateway(pool: PgPool) -> Gateway {
    let router = FanoutRouter::new(
        Arc::new(PostgresMembershipStore::new(pool.clone())),
        Arc::new(PostgresBroker::new(pool.clone())),
    );
    Gateway::new(
        Arc::new(router),
        JoinHandlers::standard(),
        Arc::new(PostgresReplayQueue::new(pool)),
    )
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CommerceStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let probe_router = Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::get))
        .with_state(ProbeState {
            metrics: metrics_handle,
            gateway: state.gateway.clone(),
        });

    Router::new()
        .route(
            "/cart",
            get(routes::cart::get::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/items", put(routes::cart::upsert_item::<S>))
        .route(
            "/cart/items/{product_id}",
            delete(routes::cart::remove_item::<S>),
        )
        .route("/cart/checkout", post(routes::cart::checkout::<S>))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", post(routes::orders::update_status::<S>))
        .route(
            "/orders/{id}/tracking",
            post(routes::orders::append_tracking::<S>),
        )
        .route("/replay", get(routes::replay::peek::<S>))
        .route("/replay/drain", post(routes::replay::drain::<S>))
        .route("/ws", get(routes::ws::upgrade::<S>))
        .with_state(state)
        .merge(probe_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

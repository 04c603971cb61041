//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::catalog::CatalogSeed;
use api::config::Config;
use api::{AppState, create_app};
use domain::{Catalog, InMemoryCatalog};
use metrics_exporter_prometheus::PrometheusHandle;
use realtime::{FanoutRouter, Gateway};
use storage::{CommerceStore, InMemoryStore, PostgresStore};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Periodically drops sockets whose task ended without a clean disconnect,
/// refreshes this process's heartbeat and sweeps memberships left behind by
/// processes that stopped heartbeating.
fn spawn_reaper(
    router: Arc<FanoutRouter>,
    interval: Duration,
    membership_ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = router.reap_closed().await {
                        tracing::warn!(error = %e, "connection reap failed");
                    }
                    if let Err(e) = router.sweep_stale(membership_ttl).await {
                        tracing::warn!(error = %e, "stale membership sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn load_catalog(config: &Config) -> InMemoryCatalog {
    let Some(path) = &config.catalog_file else {
        tracing::warn!("CATALOG_FILE not set, starting with an empty catalog");
        return InMemoryCatalog::new();
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .unwrap_or_else(|e| panic!("failed to read catalog {}: {e}", path.display()));
    let seed = CatalogSeed::from_json(&raw).expect("catalog file is not valid JSON");
    tracing::info!(
        stores = seed.stores.len(),
        products = seed.products.len(),
        "catalog loaded"
    );
    seed.into_catalog().await
}

async fn serve<S: CommerceStore + Clone + 'static>(
    config: Config,
    store: S,
    catalog: Arc<dyn Catalog>,
    gateway: Gateway,
    metrics_handle: PrometheusHandle,
) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Err(e) = gateway.router().sweep_stale(config.membership_ttl).await {
        tracing::warn!(error = %e, "startup membership sweep failed");
    }

    let listener_task = gateway
        .router()
        .start_listener(shutdown_rx.clone())
        .await
        .expect("failed to subscribe to the broker");
    let drain_task = gateway.spawn_periodic_drain(config.replay_drain_interval, shutdown_rx.clone());
    let reaper_task = spawn_reaper(
        Arc::clone(gateway.router()),
        config.reap_interval,
        config.membership_ttl,
        shutdown_rx,
    );

    let state = Arc::new(AppState::new(store, catalog, gateway));
    let app = create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for task in [listener_task, drain_task, reaper_task] {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Catalog
    let catalog: Arc<dyn Catalog> = Arc::new(load_catalog(&config).await);

    // 4. Storage and realtime backends, then serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to apply migrations");
            tracing::info!("using PostgreSQL storage and broker");

            let gateway = api::postgres_gateway(pool);
            serve(config, store, catalog, gateway, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory storage and broker");
            let gateway = api::in_memory_gateway();
            serve(config, InMemoryStore::new(), catalog, gateway, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}

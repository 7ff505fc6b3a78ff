use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use common::admin_http::spawn_admin_server;
use common::utils::logging::init_logging_from_env;
use configs::AppConfig;
use dotenvy::dotenv;
use service::observability::encode_metrics;
use service::runtime;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::routes;
use crate::state::ServerState;

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(cfg: &AppConfig) -> anyhow::Result<SocketAddr> {
    Ok(format!("{}:{}", cfg.server.host, cfg.server.port).parse()?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(event = "shutdown_signal", "shutting down http server");
}

/// Public entry: build the app and run the HTTP server
pub async fn run() -> anyhow::Result<()> {
    dotenv().ok();
    init_logging_from_env();

    let cfg = AppConfig::load_and_validate()?;
    runtime::ensure_env(&cfg.storage.data_dir, &cfg.storage.local_file).await?;

    let state = ServerState::from_config(&cfg)?;
    info!(tiers = ?state.storage.facade.tiers(), "storage tiers ready");

    let _metrics = cfg
        .metrics
        .addr
        .as_deref()
        .map(|addr| spawn_admin_server(addr, encode_metrics));
    let _blob_sync = state
        .storage
        .blob
        .clone()
        .map(|mirror| mirror.spawn_periodic_sync(Duration::from_secs(cfg.blob.sync_interval_secs.max(1))));

    let app: Router = routes::build_router(state, build_cors());

    let addr = bind_addr(&cfg)?;
    info!(%addr, "starting server crate");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

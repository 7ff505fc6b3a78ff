//! Lightweight metrics HTTP listener
//!
//! Exposes `/healthz` and `/metrics` endpoints, with metrics provided by caller.

use axum::http::StatusCode;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

async fn healthz() -> &'static str { "OK" }

async fn metrics_handler(f: fn() -> (StatusCode, String)) -> (StatusCode, String) {
    f()
}

/// Router serving `/healthz` and `/metrics`.
pub fn metrics_router(metrics_fn: fn() -> (StatusCode, String)) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(move || metrics_handler(metrics_fn)))
}

/// Spawn the metrics listener on the current runtime.
/// Bind/serve failures are logged; the main server keeps running.
pub fn spawn_admin_server(addr: &str, metrics_fn: fn() -> (StatusCode, String)) -> JoinHandle<()> {
    let addr = addr.to_string();
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, error = %e, event = "metrics_bind_failed", "cannot bind metrics listener");
                return;
            }
        };
        info!(%addr, "metrics server listening");
        if let Err(e) = axum::serve(listener, metrics_router(metrics_fn)).await {
            error!(%addr, error = %e, event = "metrics_serve_failed", "metrics listener stopped");
        }
    })
}

mod config;
mod diagnostics;
mod errors;
mod metrics;
mod model;
mod proxy;
mod rest;
mod upstream;
mod validate;

use axum::{routing::get, Router};
use config::Config;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use upstream::HttpUpstream;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    info!("Starting OneNET gateway");
    info!("HTTP server: {}", config.http_addr);
    info!("Upstream: {} (timeout {:?})", config.upstream_base_url, config.upstream_timeout);
    info!("Response normalization: {}", config.normalize);
    match config.api_key() {
        Some(key) => info!("API key configured ({} chars)", key.len()),
        None => warn!(
            "{} is not set; telemetry requests will fail until it is configured",
            config::API_KEY_ENV
        ),
    }

    metrics::init_metrics();

    let upstream = match HttpUpstream::new(config.upstream_timeout) {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("Failed to build upstream client: {}", e);
            std::process::exit(1);
        }
    };

    let http_addr = config.http_addr.clone();
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "ok" }))
        .merge(rest::create_router(Arc::new(config), Arc::new(upstream)));

    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

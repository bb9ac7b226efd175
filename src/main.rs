//! Load balancer - Main entry point
//!
//! This binary loads the configuration, wires the registry, health checker,
//! balancers and rate limiter together, and runs the HTTP server until a
//! shutdown signal arrives.

use anyhow::{Context, Result};
use lb_proxy::{app, core::AppConfig};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    init_tracing();

    let config_path = std::env::var("LB_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = AppConfig::load(&config_path)?;
    tracing::info!(path = %config_path, "configuration loaded");

    let proxy_client = create_proxy_client();
    let probe_client = create_probe_client();

    let app = app::build(&config, proxy_client, probe_client).await?;

    let listener = tokio::net::TcpListener::bind(&config.server.address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.address))?;

    tracing::info!(address = %config.server.address, "starting load balancer");
    tracing::info!("client management: GET/POST/DELETE /clients");

    axum::serve(
        listener,
        app.router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    app.shutdown();
    tracing::info!("server stopped gracefully");
    Ok(())
}

/// Initialize logging.
///
/// Default filter: info level for most crates, debug for lb_proxy. Noisy
/// HTTP library logs are suppressed regardless of the RUST_LOG setting.
fn init_tracing() {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,lb_proxy=debug".to_string());
    let filter_str = format!("{},hyper=warn,h2=warn,reqwest=warn", base_filter);
    let filter = tracing_subscriber::EnvFilter::new(filter_str);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// HTTP client for proxied traffic, with connection pooling.
fn create_proxy_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client")
}

/// HTTP client for health probes. Probes must fail fast, so the timeout is
/// much tighter than the proxy client's.
fn create_probe_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("received shutdown signal");
}

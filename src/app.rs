//! Application assembly.
//!
//! Wires the registry, health checker, per-route balancers, proxy handlers
//! and rate limiter together from an [`AppConfig`], and hands back the
//! ready-to-serve router plus a shutdown handle for the background tasks.

use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::proxy::ProxyHandler;
use crate::api::router::build_router;
use crate::core::config::AppConfig;
use crate::core::error::Result;
use crate::services::balancer::RouteBalancer;
use crate::services::health::HealthChecker;
use crate::services::limiter::TokenBucketLimiter;
use crate::services::registry::{Backend, BackendRegistry};
use crate::services::strategy::RoundRobin;

/// A fully wired application.
pub struct App {
    pub router: Router,
    pub proxies: Vec<(String, Arc<ProxyHandler>)>,
    pub limiter: Arc<TokenBucketLimiter>,
    shutdown: watch::Sender<bool>,
}

impl App {
    /// Stop the health checker workers and the refill task.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Build the application from configuration.
///
/// `proxy_client` carries proxied traffic; `probe_client` is used by the
/// health checker (each with its own timeout, owned by the caller).
pub async fn build(
    config: &AppConfig,
    proxy_client: reqwest::Client,
    probe_client: reqwest::Client,
) -> Result<App> {
    config.validate()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registry = Arc::new(BackendRegistry::new());

    let checker = HealthChecker::new(
        config.health_checker.healthy_frequency(),
        config.health_checker.unhealthy_frequency(),
        Arc::clone(&registry),
        probe_client,
        shutdown_rx.clone(),
    );
    checker.start();
    tracing::info!("health checker started");

    let mut proxies = Vec::with_capacity(config.routes.len());
    for route in &config.routes {
        let mut sinks = Vec::with_capacity(route.backends.len());
        for backend_config in &route.backends {
            let backend = Backend::new(&backend_config.url, &backend_config.health);
            registry.register(backend.clone())?;
            // Subscribe before the first probe can run so no transition is
            // missed.
            sinks.push(registry.subscribe(backend.id));
            checker.watch_backend(backend).await;
        }

        let balancer = RouteBalancer::new(Arc::clone(&registry), sinks);
        let handler = Arc::new(ProxyHandler::new(
            balancer,
            Arc::new(RoundRobin::new()),
            proxy_client.clone(),
        ));
        tracing::info!(
            path = %route.path,
            backends = route.backends.len(),
            "route configured"
        );
        proxies.push((route.path.clone(), handler));
    }

    let limiter = Arc::new(TokenBucketLimiter::new(
        config.rate_limiter.limit,
        config.rate_limiter.period(),
    ));
    Arc::clone(&limiter).start_refill(shutdown_rx);

    let router = build_router(proxies.clone(), Arc::clone(&limiter));

    Ok(App {
        router,
        proxies,
        limiter,
        shutdown: shutdown_tx,
    })
}

//! Path-routed HTTP reverse proxy with health checking and rate limiting.
//!
//! This library provides a small in-process load balancer for HTTP
//! services with features including:
//!
//! - **Path-Routed Load Balancing**: Distribute requests across a backend
//!   pool per configured route (round-robin by default, pluggable)
//! - **Health Checking**: A worker pool probes backends at
//!   state-dependent intervals and fails over automatically
//! - **Retries**: Transient upstream failures are retried with jittered
//!   backoff before the caller sees an error
//! - **Rate Limiting**: Per-client token buckets with a shared default
//!   bucket and a runtime management surface
//!
//! # Architecture
//!
//! The codebase is organized into three main layers:
//!
//! - [`core`]: Core functionality (config, errors)
//! - [`api`]: HTTP handlers (proxy entry point, client management, router)
//! - [`services`]: Concurrent subsystems (registry, health checker,
//!   balancers, strategies, limiter)
//!
//! # Example
//!
//! ```no_run
//! use lb_proxy::{app, core::AppConfig};
//! use std::net::SocketAddr;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load("config.yaml")?;
//!     let client = reqwest::Client::new();
//!     let app = app::build(&config, client.clone(), client).await?;
//!
//!     let listener = tokio::net::TcpListener::bind(&config.server.address).await?;
//!     axum::serve(
//!         listener,
//!         app.router
//!             .into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, ProxyHandler};
pub use core::{AppConfig, AppError, Result};
pub use services::{
    Backend, BackendRegistry, BackendStatus, ClientConfig, HealthChecker, RouteBalancer,
    TokenBucketLimiter,
};

//! API layer for the load balancer.
//!
//! This module contains the HTTP handlers: the per-route proxy entry
//! point, the rate limiter management surface, and the router glue that
//! binds both behind the rate-limit middleware.

pub mod clients;
pub mod proxy;
pub mod router;

// Re-export commonly used types
pub use proxy::ProxyHandler;
pub use router::build_router;

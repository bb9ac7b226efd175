//! Business logic services for the load balancer.
//!
//! This module contains the concurrent subsystems behind the HTTP surface:
//! the backend registry and its health-update bus, the health checker
//! worker pool, the per-route healthy-subset balancer, selection
//! strategies, and the token-bucket rate limiter.

pub mod balancer;
pub mod health;
pub mod limiter;
pub mod registry;
pub mod strategy;

// Re-export commonly used types
pub use balancer::RouteBalancer;
pub use health::HealthChecker;
pub use limiter::{ClientConfig, TokenBucketLimiter, DEFAULT_BUCKET};
pub use registry::{Backend, BackendRegistry, BackendStatus, SUBSCRIBER_BUFFER};
pub use strategy::{LoadBalancingStrategy, RoundRobin};

//! Configuration management for the load balancer.
//!
//! This module handles loading and parsing configuration from YAML files,
//! with support for environment variable expansion.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Routes served by the proxy, each with its backend pool
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Rate limiter configuration (default bucket)
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    /// Server configuration (listen address)
    #[serde(default)]
    pub server: ServerConfig,

    /// Health checker probe frequencies
    #[serde(default)]
    pub health_checker: HealthCheckerConfig,
}

/// Configuration for a single route: a path prefix and the backends
/// that serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix the route is mounted at (e.g. `/api`)
    pub path: String,

    /// Backends serving this route, in configuration order
    pub backends: Vec<BackendConfig>,
}

/// Configuration for a single backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend (e.g. `http://127.0.0.1:9001`)
    pub url: String,

    /// Health probe path, appended to the base URL
    #[serde(default = "default_health_path")]
    pub health: String,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Capacity of the shared `default` bucket
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Period over which `limit` requests are allowed
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_address")]
    pub address: String,
}

/// Health checker probe frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckerConfig {
    /// Re-probe delay after a healthy observation
    #[serde(default = "default_healthy_frequency_ms")]
    pub healthy_frequency_ms: u64,

    /// Re-probe delay after an unhealthy observation
    #[serde(default = "default_unhealthy_frequency_ms")]
    pub unhealthy_frequency_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            period_secs: default_period_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            healthy_frequency_ms: default_healthy_frequency_ms(),
            unhealthy_frequency_ms: default_unhealthy_frequency_ms(),
        }
    }
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_limit() -> usize {
    100
}

fn default_period_secs() -> u64 {
    30
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_healthy_frequency_ms() -> u64 {
    5_000
}

fn default_unhealthy_frequency_ms() -> u64 {
    10_000
}

impl HealthCheckerConfig {
    pub fn healthy_frequency(&self) -> Duration {
        Duration::from_millis(self.healthy_frequency_ms)
    }

    pub fn unhealthy_frequency(&self) -> Duration {
        Duration::from_millis(self.unhealthy_frequency_ms)
    }
}

impl RateLimiterConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        // Expand environment variables
        let expanded = expand_env_vars(&content);

        let config: AppConfig = serde_yaml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the rest of the system relies on.
    ///
    /// Route paths must be non-empty, rooted and unique; backend URLs must
    /// be absolute http(s) URLs; the default bucket needs at least one token.
    pub fn validate(&self) -> Result<()> {
        let mut seen_paths = HashSet::new();
        for route in &self.routes {
            if route.path.is_empty() || !route.path.starts_with('/') {
                bail!("route path {:?} must start with '/'", route.path);
            }
            if !seen_paths.insert(route.path.as_str()) {
                bail!("duplicate route path {:?}", route.path);
            }
            for backend in &route.backends {
                reqwest::Url::parse(&backend.url)
                    .with_context(|| format!("invalid backend url {:?}", backend.url))?;
            }
        }

        if self.rate_limiter.limit == 0 {
            bail!("rate_limiter.limit must be at least 1");
        }
        if self.rate_limiter.period_secs == 0 {
            bail!("rate_limiter.period_secs must be at least 1");
        }
        Ok(())
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::?-?([^}]*))?\}").expect("env var pattern is valid");

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
    })
    .to_string()
}

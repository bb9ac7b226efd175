//! Per-route maintainer of the healthy subset.
//!
//! A `RouteBalancer` owns the list of backends currently believed healthy
//! for one route. It consumes liveness transitions from the registry bus
//! (one subscription sink per configured backend) and mutates the subset
//! under exclusive write access; the proxy entry point takes cheap
//! snapshots for selection.

use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::services::registry::{Backend, BackendRegistry, BackendStatus};

/// Healthy-subset tracker for one route.
pub struct RouteBalancer {
    healthy: Arc<RwLock<Vec<Backend>>>,
}

impl RouteBalancer {
    /// Build a balancer from the registry handle and one subscription sink
    /// per backend in the route. Spawns one consumer task per sink; each
    /// consumer lives as long as its sink's sender side.
    pub fn new(
        registry: Arc<BackendRegistry>,
        sinks: Vec<mpsc::Receiver<BackendStatus>>,
    ) -> Self {
        let healthy = Arc::new(RwLock::new(Vec::new()));

        for mut sink in sinks {
            let registry = Arc::clone(&registry);
            let healthy = Arc::clone(&healthy);
            tokio::spawn(async move {
                while let Some(update) = sink.recv().await {
                    apply_update(&registry, &healthy, update);
                }
            });
        }

        Self { healthy }
    }

    /// Copy of the current healthy subset, in no particular order.
    pub fn healthy_snapshot(&self) -> Vec<Backend> {
        self.healthy
            .read()
            .expect("healthy subset lock poisoned")
            .clone()
    }
}

/// Apply one liveness transition to the healthy subset.
///
/// The subset holds at most one entry per identity: a `healthy=true` update
/// for an already-present backend is a no-op, and removal uses `swap_remove`
/// (order is not preserved).
fn apply_update(
    registry: &BackendRegistry,
    healthy: &RwLock<Vec<Backend>>,
    update: BackendStatus,
) {
    let mut subset = healthy.write().expect("healthy subset lock poisoned");

    if update.healthy {
        if subset.iter().any(|b| b.id == update.id) {
            return;
        }
        match registry.lookup(update.id) {
            Some(backend) => {
                tracing::info!(id = update.id, url = %backend.url, "backend marked healthy");
                subset.push(backend);
            }
            None => {
                tracing::warn!(id = update.id, "no descriptor for healthy backend, skipping");
            }
        }
    } else if let Some(pos) = subset.iter().position(|b| b.id == update.id) {
        let removed = subset.swap_remove(pos);
        tracing::info!(id = update.id, url = %removed.url, "backend marked unhealthy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registered_backend(registry: &BackendRegistry, port: u16) -> Backend {
        let backend = Backend::new(format!("http://localhost:{port}"), "/health");
        registry.register(backend.clone()).unwrap();
        backend
    }

    /// Wait until the subset reaches `len`, or panic after a timeout.
    async fn wait_for_len(balancer: &RouteBalancer, len: usize) {
        for _ in 0..200 {
            if balancer.healthy_snapshot().len() == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "healthy subset never reached length {len}, got {:?}",
            balancer.healthy_snapshot()
        );
    }

    #[tokio::test]
    async fn test_healthy_update_adds_backend() {
        let registry = Arc::new(BackendRegistry::new());
        let backend = registered_backend(&registry, 9001);
        let sink = registry.subscribe(backend.id);
        let balancer = RouteBalancer::new(Arc::clone(&registry), vec![sink]);

        registry
            .publish_status(BackendStatus {
                id: backend.id,
                healthy: true,
            })
            .await
            .unwrap();

        wait_for_len(&balancer, 1).await;
        assert_eq!(balancer.healthy_snapshot()[0], backend);
    }

    #[tokio::test]
    async fn test_repeated_healthy_updates_do_not_duplicate() {
        let registry = Arc::new(BackendRegistry::new());
        let backend = registered_backend(&registry, 9001);
        let sink = registry.subscribe(backend.id);
        let balancer = RouteBalancer::new(Arc::clone(&registry), vec![sink]);

        for _ in 0..5 {
            registry
                .publish_status(BackendStatus {
                    id: backend.id,
                    healthy: true,
                })
                .await
                .unwrap();
        }

        wait_for_len(&balancer, 1).await;
        // Give the consumer a chance to misbehave before re-checking.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(balancer.healthy_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_update_removes_backend() {
        let registry = Arc::new(BackendRegistry::new());
        let a = registered_backend(&registry, 9001);
        let b = registered_backend(&registry, 9002);
        let sinks = vec![registry.subscribe(a.id), registry.subscribe(b.id)];
        let balancer = RouteBalancer::new(Arc::clone(&registry), sinks);

        for id in [a.id, b.id] {
            registry
                .publish_status(BackendStatus { id, healthy: true })
                .await
                .unwrap();
        }
        wait_for_len(&balancer, 2).await;

        registry
            .publish_status(BackendStatus {
                id: a.id,
                healthy: false,
            })
            .await
            .unwrap();
        wait_for_len(&balancer, 1).await;
        assert_eq!(balancer.healthy_snapshot()[0].id, b.id);
    }

    #[tokio::test]
    async fn test_unhealthy_update_for_absent_backend_is_noop() {
        let registry = Arc::new(BackendRegistry::new());
        let backend = registered_backend(&registry, 9001);
        let sink = registry.subscribe(backend.id);
        let balancer = RouteBalancer::new(Arc::clone(&registry), vec![sink]);

        registry
            .publish_status(BackendStatus {
                id: backend.id,
                healthy: false,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(balancer.healthy_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_skipped() {
        let registry = Arc::new(BackendRegistry::new());
        // Hand the balancer a raw sink so a status can arrive for an
        // identity the registry has never seen.
        let (tx, rx) = mpsc::channel(16);
        let balancer = RouteBalancer::new(Arc::clone(&registry), vec![rx]);

        tx.send(BackendStatus {
            id: 999_999,
            healthy: true,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(balancer.healthy_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_subset_stays_subset_of_route_backends() {
        let registry = Arc::new(BackendRegistry::new());
        let route_backends: Vec<Backend> = (0..3)
            .map(|i| registered_backend(&registry, 9001 + i))
            .collect();
        let sinks = route_backends
            .iter()
            .map(|b| registry.subscribe(b.id))
            .collect();
        let balancer = RouteBalancer::new(Arc::clone(&registry), sinks);

        // Flap every backend a few times.
        for round in 0..3 {
            for backend in &route_backends {
                registry
                    .publish_status(BackendStatus {
                        id: backend.id,
                        healthy: round % 2 == 0,
                    })
                    .await
                    .unwrap();
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = balancer.healthy_snapshot();
        let route_ids: Vec<u64> = route_backends.iter().map(|b| b.id).collect();
        let mut seen = std::collections::HashSet::new();
        for backend in &snapshot {
            assert!(route_ids.contains(&backend.id));
            assert!(seen.insert(backend.id), "duplicate entry in healthy subset");
        }
    }
}

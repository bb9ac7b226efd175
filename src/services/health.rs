//! Health checking for registered backends.
//!
//! A small worker pool shares one pending-probe queue. Each worker takes a
//! backend, probes its health endpoint, publishes a transition to the
//! registry if the liveness changed, and schedules the next probe after a
//! state-dependent delay. Transitions are emitted only on edges, which
//! bounds the publication rate no matter how often backends are probed.

use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

use crate::services::registry::{Backend, BackendRegistry, BackendStatus};

/// Number of concurrent probe workers.
const NUM_WORKERS: usize = 3;

/// Capacity of the shared pending-probe queue.
const PENDING_QUEUE_CAPACITY: usize = 1024;

/// Asynchronous health monitor for backends.
///
/// The probe client is supplied by the caller; its timeout is the caller's
/// concern. The `shutdown` signal makes workers exit after their current
/// probe and stops further re-enqueue scheduling.
#[derive(Clone)]
pub struct HealthChecker {
    pending_tx: mpsc::Sender<Backend>,
    pending_rx: Arc<Mutex<mpsc::Receiver<Backend>>>,
    healthy_frequency: Duration,
    unhealthy_frequency: Duration,
    registry: Arc<BackendRegistry>,
    healthy_set: Arc<DashMap<u64, ()>>,
    client: reqwest::Client,
    shutdown: watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        healthy_frequency: Duration,
        unhealthy_frequency: Duration,
        registry: Arc<BackendRegistry>,
        client: reqwest::Client,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (pending_tx, pending_rx) = mpsc::channel(PENDING_QUEUE_CAPACITY);
        Self {
            pending_tx,
            pending_rx: Arc::new(Mutex::new(pending_rx)),
            healthy_frequency,
            unhealthy_frequency,
            registry,
            healthy_set: Arc::new(DashMap::new()),
            client,
            shutdown,
        }
    }

    /// Spawn the worker pool.
    pub fn start(&self) {
        for worker_id in 0..NUM_WORKERS {
            let checker = self.clone();
            tokio::spawn(checker.worker(worker_id));
        }
    }

    /// Add a backend to the monitoring queue.
    pub async fn watch_backend(&self, backend: Backend) {
        tracing::info!(url = %backend.url, "backend added to health checker");
        if self.pending_tx.send(backend).await.is_err() {
            tracing::error!("health checker pending queue closed");
        }
    }

    async fn worker(self, worker_id: usize) {
        tracing::info!(worker_id, "health check worker started");
        let mut shutdown = self.shutdown.clone();

        loop {
            // Hold the queue lock only while waiting for the next backend;
            // the probe itself runs without it so workers probe in parallel.
            let backend = {
                let mut pending = self.pending_rx.lock().await;
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => None,
                    backend = pending.recv() => backend,
                }
            };
            let Some(backend) = backend else { break };

            if let Err(panic) = AssertUnwindSafe(self.check_backend(backend))
                .catch_unwind()
                .await
            {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(worker_id, panic = %msg, "health probe panicked");
            }
        }

        tracing::info!(worker_id, "health check worker stopped");
    }

    /// Probe one backend and schedule its next check.
    async fn check_backend(&self, backend: Backend) {
        let healthy = match self.client.get(backend.probe_url()).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                tracing::debug!(url = %backend.url, "backend is healthy");
                true
            }
            Ok(resp) => {
                tracing::debug!(url = %backend.url, status = %resp.status(), "backend is unhealthy");
                false
            }
            Err(err) => {
                tracing::debug!(url = %backend.url, error = %err, "backend is unhealthy");
                false
            }
        };

        self.publish_transition(&backend, healthy).await;

        // The re-probe delay is measured from probe completion, not start.
        let delay = if healthy {
            self.healthy_frequency
        } else {
            self.unhealthy_frequency
        };
        let tx = self.pending_tx.clone();
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(backend).await;
                }
            }
        });
    }

    /// Publish a status update iff the observation is an edge transition.
    async fn publish_transition(&self, backend: &Backend, healthy: bool) {
        let was_healthy = self.healthy_set.contains_key(&backend.id);
        let transition = if healthy && !was_healthy {
            self.healthy_set.insert(backend.id, ());
            Some(true)
        } else if !healthy && was_healthy {
            self.healthy_set.remove(&backend.id);
            Some(false)
        } else {
            None
        };

        if let Some(now_healthy) = transition {
            tracing::info!(
                id = backend.id,
                url = %backend.url,
                healthy = now_healthy,
                "backend health transition"
            );
            let status = BackendStatus {
                id: backend.id,
                healthy: now_healthy,
            };
            if let Err(err) = self.registry.publish_status(status).await {
                tracing::warn!(id = backend.id, error = %err, "failed to publish health transition");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn checker_with(
        registry: Arc<BackendRegistry>,
        frequency: Duration,
    ) -> (HealthChecker, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let checker = HealthChecker::new(
            frequency,
            frequency,
            registry,
            reqwest::Client::new(),
            shutdown_rx,
        );
        (checker, shutdown_tx)
    }

    async fn healthy_mock_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_probe_200_publishes_healthy_once() {
        let server = healthy_mock_server().await;
        let registry = Arc::new(BackendRegistry::new());
        let backend = Backend::new(server.uri(), "/health");
        registry.register(backend.clone()).unwrap();
        let mut sink = registry.subscribe(backend.id);

        let (checker, _shutdown) = checker_with(Arc::clone(&registry), Duration::from_millis(10));
        checker.start();
        checker.watch_backend(backend.clone()).await;

        let update = sink.recv().await.unwrap();
        assert_eq!(update, BackendStatus { id: backend.id, healthy: true });

        // The backend keeps getting probed but stays healthy; repeated
        // same-state observations must stay silent.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_200_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let registry = Arc::new(BackendRegistry::new());
        let backend = Backend::new(server.uri(), "/health");
        registry.register(backend.clone()).unwrap();
        let mut sink = registry.subscribe(backend.id);

        let (checker, _shutdown) = checker_with(Arc::clone(&registry), Duration::from_millis(10));
        checker.start();
        checker.watch_backend(backend).await;

        // Never healthy, so no edge ever fires.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_backend_publishes_unhealthy_edge() {
        let server = healthy_mock_server().await;
        let registry = Arc::new(BackendRegistry::new());
        let backend = Backend::new(server.uri(), "/health");
        registry.register(backend.clone()).unwrap();
        let mut sink = registry.subscribe(backend.id);

        let (checker, _shutdown) = checker_with(Arc::clone(&registry), Duration::from_millis(10));
        checker.start();
        checker.watch_backend(backend.clone()).await;

        assert!(sink.recv().await.unwrap().healthy);

        // Kill the backend; the next probe fails and must emit exactly one
        // unhealthy transition.
        drop(server);
        let update = sink.recv().await.unwrap();
        assert_eq!(update, BackendStatus { id: backend.id, healthy: false });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_probing() {
        let server = healthy_mock_server().await;
        let registry = Arc::new(BackendRegistry::new());
        let backend = Backend::new(server.uri(), "/health");
        registry.register(backend.clone()).unwrap();

        let (checker, shutdown) = checker_with(Arc::clone(&registry), Duration::from_millis(10));
        checker.start();
        checker.watch_backend(backend).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(true).unwrap();
        // Let in-flight probes and timers drain.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = server.received_requests().await.unwrap().len();
        assert!(before > 0, "backend was never probed");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = server.received_requests().await.unwrap().len();
        assert_eq!(before, after, "probing continued after shutdown");
    }
}

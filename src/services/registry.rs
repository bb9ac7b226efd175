//! Backend registry and health-update bus.
//!
//! The registry is the process-wide catalog of backends. Alongside the
//! descriptor and latest-status maps it owns a publish/subscribe bus of
//! per-backend liveness transitions: route balancers subscribe per backend
//! identity and receive every status published after the subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

use crate::core::error::{AppError, Result};

/// Buffer capacity of each subscriber sink. A full sink blocks the
/// publisher; updates are never dropped.
pub const SUBSCRIBER_BUFFER: usize = 16;

static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

/// Descriptor of an upstream HTTP server. Immutable after registration.
///
/// Identity is process-unique and assigned monotonically at construction;
/// two backends with identical URLs are still distinct entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub id: u64,
    pub url: String,
    pub health_path: String,
}

impl Backend {
    pub fn new(url: impl Into<String>, health_path: impl Into<String>) -> Self {
        Self {
            id: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            url: url.into(),
            health_path: health_path.into(),
        }
    }

    /// Full URL of the health probe endpoint.
    pub fn probe_url(&self) -> String {
        format!("{}{}", self.url, self.health_path)
    }
}

/// Latest liveness observation for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    pub id: u64,
    pub healthy: bool,
}

#[derive(Default)]
struct RegistryInner {
    descriptors: HashMap<u64, Backend>,
    statuses: HashMap<u64, BackendStatus>,
    subscribers: HashMap<u64, Vec<mpsc::Sender<BackendStatus>>>,
}

/// Thread-safe backend catalog with per-backend status subscriptions.
#[derive(Default)]
pub struct BackendRegistry {
    inner: RwLock<RegistryInner>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a backend descriptor.
    ///
    /// Fails with [`AppError::DuplicateId`] if the identity is already
    /// registered; descriptors are never overwritten.
    pub fn register(&self, backend: Backend) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.descriptors.contains_key(&backend.id) {
            return Err(AppError::DuplicateId(backend.id));
        }
        inner.descriptors.insert(backend.id, backend);
        Ok(())
    }

    /// Return the descriptor registered under `id`, if any.
    pub fn lookup(&self, id: u64) -> Option<Backend> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.descriptors.get(&id).cloned()
    }

    /// Latest status observed for `id`, if any probe completed yet.
    pub fn latest_status(&self, id: u64) -> Option<BackendStatus> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.statuses.get(&id).copied()
    }

    /// Subscribe to all future status values for `id`.
    ///
    /// Statuses published before the subscription are not replayed.
    pub fn subscribe(&self, id: u64) -> mpsc::Receiver<BackendStatus> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.subscribers.entry(id).or_default().push(tx);
        rx
    }

    /// Record `status` as the backend's latest and deliver it to every
    /// subscriber registered for that identity.
    ///
    /// Fails with [`AppError::UnknownBackend`] if no descriptor exists.
    /// Delivery blocks on a full sink, but only after the registry lock is
    /// released, so a slow subscriber never blocks readers. Per-identity
    /// publications are serialized by the health checker, which keeps the
    /// delivery order identical for every subscriber.
    pub async fn publish_status(&self, status: BackendStatus) -> Result<()> {
        let sinks = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            if !inner.descriptors.contains_key(&status.id) {
                return Err(AppError::UnknownBackend(status.id));
            }
            inner.statuses.insert(status.id, status);
            inner
                .subscribers
                .get(&status.id)
                .cloned()
                .unwrap_or_default()
        };

        for sink in sinks {
            if sink.send(status).await.is_err() {
                // Subscriber dropped its receiver; the sender stays in the
                // list because backend removal is unsupported.
                tracing::debug!(id = status.id, "subscriber sink closed, update skipped");
            }
        }
        Ok(())
    }
}

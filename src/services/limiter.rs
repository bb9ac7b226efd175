//! Token-bucket rate limiting with per-client buckets.
//!
//! Every client key (an IP) maps to a bucket; callers without a bucket of
//! their own draw from the shared `default` bucket. A single periodic task
//! refills all buckets at the cadence `period / default_capacity` — one
//! token per non-full bucket per tick. Per-client `interval` values are
//! stored and served back through the management surface but do not drive
//! the refill cadence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Key of the shared fallback bucket.
pub const DEFAULT_BUCKET: &str = "default";

/// A bounded counting semaphore of admission tokens.
///
/// Takes and puts are independently atomic; the invariant
/// `0 <= available <= capacity` always holds because only the refill task
/// adds permits and it checks the bound first.
struct TokenBucket {
    capacity: usize,
    tokens: Semaphore,
}

impl TokenBucket {
    /// A bucket seeded full.
    fn full(capacity: usize) -> Self {
        Self {
            capacity,
            tokens: Semaphore::new(capacity),
        }
    }

    /// Take one token without blocking. Returns false when empty.
    fn try_take(&self) -> bool {
        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Add one token unless the bucket is already full.
    fn refill_one(&self) {
        if self.tokens.available_permits() < self.capacity {
            self.tokens.add_permits(1);
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.tokens.available_permits()
    }
}

/// Per-client rate limit configuration, as stored and served by the
/// management surface. `interval` travels as integer nanoseconds on the
/// wire; unknown JSON fields are ignored and missing ones default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(rename = "client_ip")]
    pub ip: String,
    pub capacity: usize,
    #[serde(with = "duration_nanos")]
    pub interval: Duration,
}

/// Serialize a `Duration` as integer nanoseconds.
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

/// Token-bucket admission control with a runtime management surface.
pub struct TokenBucketLimiter {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    clients: RwLock<HashMap<String, ClientConfig>>,
    refill_interval: Duration,
}

impl TokenBucketLimiter {
    /// Create a limiter whose `default` bucket holds `default_capacity`
    /// tokens refilled over `period`. The bucket starts full.
    ///
    /// The refill task is not started here; call [`start_refill`] once.
    ///
    /// [`start_refill`]: TokenBucketLimiter::start_refill
    pub fn new(default_capacity: usize, period: Duration) -> Self {
        // tokio intervals reject a zero period.
        let refill_interval =
            Duration::from_nanos(((period.as_nanos() / default_capacity as u128) as u64).max(1));

        let mut buckets = HashMap::new();
        buckets.insert(
            DEFAULT_BUCKET.to_string(),
            Arc::new(TokenBucket::full(default_capacity)),
        );

        Self {
            buckets: RwLock::new(buckets),
            clients: RwLock::new(HashMap::new()),
            refill_interval,
        }
    }

    /// Spawn the periodic refill task. It exits when `shutdown` is raised.
    pub fn start_refill(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let limiter = self;
        tracing::info!(interval = ?limiter.refill_interval, "token bucket refill started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.refill_interval);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => {
                        tracing::info!("token bucket refill stopped");
                        return;
                    }
                    _ = ticker.tick() => limiter.refill_buckets(),
                }
            }
        });
    }

    /// Add one token to every non-full bucket.
    fn refill_buckets(&self) {
        let buckets = self.buckets.read().expect("bucket map lock poisoned");
        for bucket in buckets.values() {
            bucket.refill_one();
        }
    }

    /// Decide admission for `key`.
    ///
    /// Keys shaped like an address (containing `.` or `:`) that match a
    /// registered client draw from that client's bucket; everything else
    /// falls through to `default`. Returns false when the chosen bucket is
    /// empty.
    pub fn allow(&self, key: &str) -> bool {
        let buckets = self.buckets.read().expect("bucket map lock poisoned");

        if is_client_key(key) {
            if let Some(bucket) = buckets.get(key) {
                let allowed = bucket.try_take();
                tracing::debug!(client = key, allowed, "client bucket admission");
                return allowed;
            }
        }

        let allowed = buckets
            .get(DEFAULT_BUCKET)
            .map(|bucket| bucket.try_take())
            .unwrap_or(false);
        tracing::debug!(client = key, allowed, "default bucket admission");
        allowed
    }

    /// Register a client with its own bucket, seeded full. Overwrites any
    /// existing entry for the same key.
    pub fn add_client(&self, config: ClientConfig) {
        let bucket = Arc::new(TokenBucket::full(config.capacity));
        // Bucket first, config second: a registered client always has a
        // corresponding bucket.
        self.buckets
            .write()
            .expect("bucket map lock poisoned")
            .insert(config.ip.clone(), bucket);
        tracing::info!(ip = %config.ip, capacity = config.capacity, "client added to rate limiter");
        self.clients
            .write()
            .expect("client map lock poisoned")
            .insert(config.ip.clone(), config);
    }

    pub fn get_client(&self, key: &str) -> Option<ClientConfig> {
        self.clients
            .read()
            .expect("client map lock poisoned")
            .get(key)
            .cloned()
    }

    /// Remove a client's config and bucket.
    pub fn delete_client(&self, key: &str) {
        self.clients
            .write()
            .expect("client map lock poisoned")
            .remove(key);
        self.buckets
            .write()
            .expect("bucket map lock poisoned")
            .remove(key);
        tracing::info!(ip = key, "client deleted from rate limiter");
    }

    /// Snapshot of all registered clients; order is unspecified.
    pub fn list_clients(&self) -> Vec<ClientConfig> {
        self.clients
            .read()
            .expect("client map lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    fn bucket_available(&self, key: &str) -> Option<usize> {
        self.buckets
            .read()
            .unwrap()
            .get(key)
            .map(|bucket| bucket.available())
    }
}

/// A key counts as a client key when it looks like an address.
fn is_client_key(key: &str) -> bool {
    key.contains('.') || key.contains(':')
}

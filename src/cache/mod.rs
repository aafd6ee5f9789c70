//! Cache-aside store shared by every pipeline stage
//!
//! Values are serialized with `postcard` and handed to a [`CacheBackend`], so a
//! single [`CacheStore`] serves the geocode and forecast tiers alike. Entries
//! are only ever replaced wholesale: a write is last-writer-wins and a read
//! past the entry's TTL behaves as if the key were absent. Reads never delete;
//! stale entries are dropped by a sweep that runs on write at most once per
//! [`SWEEP_INTERVAL`].

mod memory;
mod persistent;

pub use memory::MemoryBackend;
pub use persistent::PersistentBackend;

use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::SkycastError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Minimum spacing between two sweeps of the same store
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One stored value and its freshness window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// `postcard` encoding of the cached value
    pub value: Vec<u8>,
    /// Unix timestamp in milliseconds
    pub created_at_ms: i64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    fn expires_at_ms(&self) -> i64 {
        self.created_at_ms
            .saturating_add(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX))
    }

    /// An entry is fresh strictly before `created_at + ttl`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.expires_at_ms()
    }
}

/// Storage behind a [`CacheStore`]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Replaces any prior entry under `entry.key`.
    async fn write(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Drops every entry that is stale at `now` and returns how many went.
    /// An entry written fresh while the sweep runs must survive it.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// A value together with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub was_cache_hit: bool,
}

pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    /// Unix millis before which no sweep runs
    next_sweep_ms: AtomicI64,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            next_sweep_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Process-local store on the wall clock
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()), Arc::new(SystemClock))
    }

    /// Store on the configured backend
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        match config.backend.as_str() {
            "memory" => Ok(Self::in_memory()),
            "persistent" => {
                let backend = PersistentBackend::open(&config.location)?;
                Ok(Self::new(Arc::new(backend), Arc::new(SystemClock)))
            }
            other => Err(SkycastError::config(format!(
                "Unknown cache backend '{other}'"
            ))),
        }
    }

    /// Returns the fresh entry under `key`, or runs `producer` and stores its
    /// value for `ttl`.
    ///
    /// With `skip_cache` the producer always runs and its value overwrites
    /// whatever was cached. A producer error is returned as-is and nothing is
    /// written.
    #[tracing::instrument(name = "cache_fetch", level = "debug", skip(self, producer))]
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        skip_cache: bool,
        producer: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if !skip_cache {
            if let Some(value) = self.lookup::<T>(key).await? {
                return Ok(Cached {
                    value,
                    was_cache_hit: true,
                });
            }
        }

        let value = producer().await?;
        self.put(key, &value, ttl).await?;
        Ok(Cached {
            value,
            was_cache_hit: false,
        })
    }

    /// Drops the entry under `key`, if any.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.backend.remove(key).await
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(entry) = self.backend.read(key).await? else {
            debug!("Key not found");
            return Ok(None);
        };

        if !entry.is_fresh(self.clock.now()) {
            debug!("Key found but expired");
            return Ok(None);
        }

        match postcard::from_bytes::<T>(&entry.value) {
            Ok(value) => {
                debug!("Key found and still fresh");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(key, error = %e, "Cached value no longer decodes, treating as miss");
                Ok(None)
            }
        }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = postcard::to_stdvec(value)
            .map_err(|e| SkycastError::cache(format!("Failed to encode value for {key}: {e}")))?;
        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            value: bytes,
            created_at_ms: now.timestamp_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        self.backend.write(entry).await?;
        self.sweep_if_due(now).await;
        Ok(())
    }

    /// Purges stale entries unless a sweep ran less than [`SWEEP_INTERVAL`]
    /// ago. Only one caller wins each slot. Failures are logged, not returned:
    /// the value itself is already stored.
    async fn sweep_if_due(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let due = self.next_sweep_ms.load(Ordering::Acquire);
        if now_ms < due {
            return;
        }
        let interval_ms = i64::try_from(SWEEP_INTERVAL.as_millis()).unwrap_or(i64::MAX);
        let next = now_ms.saturating_add(interval_ms);
        if self
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match self.backend.purge_expired(now).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Swept expired cache entries"),
            Err(e) => warn!(error = %e, "Cache sweep failed"),
        }
    }
}

/// A namespace of a [`CacheStore`] with a TTL fixed at construction
#[derive(Clone)]
pub struct CacheTier {
    store: Arc<CacheStore>,
    namespace: String,
    ttl: Duration,
}

impl CacheTier {
    pub fn new(store: Arc<CacheStore>, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Full store key for `suffix` in this tier
    #[must_use]
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    pub async fn fetch<T, F, Fut>(
        &self,
        suffix: &str,
        skip_cache: bool,
        producer: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.store
            .fetch(&self.key(suffix), self.ttl, skip_cache, producer)
            .await
    }

    pub async fn invalidate(&self, suffix: &str) -> Result<()> {
        self.store.invalidate(&self.key(suffix)).await
    }
}

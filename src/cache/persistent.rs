use super::{CacheBackend, CacheEntry};
use crate::Result;
use crate::error::SkycastError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::Keyspace;
use std::path::Path;
use tokio::sync::Mutex;
use tokio::task;

/// On-disk backend, survives restarts
pub struct PersistentBackend {
    store: Keyspace,
    /// Serializes mutations so a sweep never deletes a concurrent fresh write
    writes: Mutex<()>,
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
    let value = store
        .get(key)
        .map_err(|e| SkycastError::cache(format!("Failed to read cache keyspace: {e}")))?;
    Ok(value.map(|v| v.to_vec()))
}

/// Keys whose entry is stale at `now_ms` or no longer decodes
fn stale_keys(store: &Keyspace, now_ms: i64) -> Result<Vec<Vec<u8>>> {
    let mut stale = Vec::new();
    for guard in store.iter() {
        let (key, value) = guard
            .into_inner()
            .map_err(|e| SkycastError::cache(format!("Failed to scan cache keyspace: {e}")))?;
        let expired = match postcard::from_bytes::<CacheEntry>(&value) {
            Ok(entry) => now_ms >= entry.expires_at_ms(),
            Err(_) => true,
        };
        if expired {
            stale.push(key.to_vec());
        }
    }
    Ok(stale)
}

impl PersistentBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = fjall::Database::builder(path).open().map_err(|e| {
            SkycastError::cache(format!(
                "Failed to open cache database at {}: {e}",
                path.display()
            ))
        })?;
        let items = db
            .keyspace("cache", fjall::KeyspaceCreateOptions::default)
            .map_err(|e| SkycastError::cache(format!("Failed to open cache keyspace: {e}")))?;
        Ok(Self {
            store: items,
            writes: Mutex::new(()),
        })
    }
}

#[async_trait]
impl CacheBackend for PersistentBackend {
    #[tracing::instrument(name = "query_cache", level = "debug", skip(self))]
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        let store = self.store.clone();
        let key_bytes = key.as_bytes().to_vec();

        let maybe_bytes = task::spawn_blocking(move || get_from_store(store, key_bytes))
            .await
            .map_err(|e| SkycastError::cache(format!("Cache read task failed: {e}")))??;

        let Some(bytes) = maybe_bytes else {
            return Ok(None);
        };
        match postcard::from_bytes::<CacheEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored entry is corrupt, ignoring it");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(
        name = "put_cache",
        level = "debug",
        skip(self, entry),
        fields(key = %entry.key)
    )]
    async fn write(&self, entry: CacheEntry) -> Result<()> {
        let store = self.store.clone();
        let key = entry.key.as_bytes().to_vec();
        let bytes = postcard::to_stdvec(&entry)
            .map_err(|e| SkycastError::cache(format!("Failed to encode cache entry: {e}")))?;

        let _guard = self.writes.lock().await;
        task::spawn_blocking(move || store.insert(key, bytes))
            .await
            .map_err(|e| SkycastError::cache(format!("Cache write task failed: {e}")))?
            .map_err(|e| SkycastError::cache(format!("Failed to write cache entry: {e}")))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.as_bytes().to_vec();
        let store = self.store.clone();
        let _guard = self.writes.lock().await;
        task::spawn_blocking(move || store.remove(key))
            .await
            .map_err(|e| SkycastError::cache(format!("Cache remove task failed: {e}")))?
            .map_err(|e| SkycastError::cache(format!("Failed to remove cache entry: {e}")))?;
        Ok(())
    }

    #[tracing::instrument(name = "sweep_cache", level = "debug", skip(self))]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let store = self.store.clone();
        let now_ms = now.timestamp_millis();
        let _guard = self.writes.lock().await;

        task::spawn_blocking(move || {
            let stale = stale_keys(&store, now_ms)?;
            let purged = stale.len();
            for key in stale {
                store.remove(key).map_err(|e| {
                    SkycastError::cache(format!("Failed to remove stale cache entry: {e}"))
                })?;
            }
            Ok(purged)
        })
        .await
        .map_err(|e| SkycastError::cache(format!("Cache sweep task failed: {e}")))?
    }
}

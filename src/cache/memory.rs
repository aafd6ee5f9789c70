use super::{CacheBackend, CacheEntry};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    /// Number of stored entries, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, entry: CacheEntry) -> Result<()> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        Ok(before - entries.len())
    }
}

//! In-memory cache backend.

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore, RequestKey};
use crate::error::{SwError, SwResult};

type Cache = HashMap<RequestKey, CacheEntry>;

/// Caches held in process memory; lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn open(&self, name: &str) -> SwResult<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> SwResult<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn get(&self, name: &str, key: &RequestKey) -> SwResult<Option<CacheEntry>> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.get(key))
            .cloned())
    }

    async fn keys(&self, name: &str) -> SwResult<Vec<RequestKey>> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn rename(&self, from: &str, to: &str) -> SwResult<()> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .remove(from)
            .ok_or_else(|| SwError::cache(format!("cannot rename missing cache {from}")))?;
        caches.insert(to.to_string(), cache);
        Ok(())
    }

    async fn names(&self) -> SwResult<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

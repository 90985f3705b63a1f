//! In-memory store backend.
//!
//! Mirrors [`CacheDb`](super::CacheDb) semantics without touching disk.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{CacheStore, StoreEntry};
use crate::Error;

/// Process-local stores keyed by name. Cloning shares the same maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    stores: Arc<RwLock<HashMap<String, HashMap<String, StoreEntry>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn create(&self, name: &str) -> Result<bool, Error> {
        let mut stores = self.stores.write().await;
        if stores.contains_key(name) {
            return Ok(false);
        }
        stores.insert(name.to_string(), HashMap::new());
        Ok(true)
    }

    async fn has(&self, name: &str) -> Result<bool, Error> {
        Ok(self.stores.read().await.contains_key(name))
    }

    async fn names(&self) -> Result<Vec<String>, Error> {
        let mut names: Vec<String> = self.stores.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        Ok(self.stores.write().await.remove(name).is_some())
    }

    async fn delete_except(&self, keep: &str) -> Result<Vec<String>, Error> {
        let mut stores = self.stores.write().await;
        let mut deleted: Vec<String> = stores.keys().filter(|name| name.as_str() != keep).cloned().collect();
        deleted.sort();
        stores.retain(|name, _| name == keep);
        Ok(deleted)
    }

    async fn get(&self, name: &str, key: &str) -> Result<Option<StoreEntry>, Error> {
        let stores = self.stores.read().await;
        Ok(stores.get(name).and_then(|entries| entries.get(key)).cloned())
    }

    async fn put(&self, name: &str, entry: StoreEntry) -> Result<(), Error> {
        let mut stores = self.stores.write().await;
        let entries = stores.get_mut(name).ok_or_else(|| Error::StoreMissing(name.to_string()))?;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn len(&self, name: &str) -> Result<usize, Error> {
        let stores = self.stores.read().await;
        stores
            .get(name)
            .map(HashMap::len)
            .ok_or_else(|| Error::StoreMissing(name.to_string()))
    }
}

//! In-memory TTL cache
//!
//! `CacheStore` is a single named store guarded by one mutex. `CacheManager`
//! hands out stores by name, creating them on first use.
//!
//! Eviction: expired entries are dropped lazily when read; when a `set` would
//! exceed capacity, the single oldest-created entry goes (not LRU).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// One named key-value store
pub struct CacheStore {
    name: String,
    capacity: usize,
    default_ttl: Option<Duration>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new(name: &str, capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            capacity: capacity.max(1),
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a value, evicting it if it has expired
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Insert or replace a value. `ttl` overrides the store default;
    /// a store without a default keeps entries until deleted.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let ttl = ttl.or(self.default_ttl);

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::debug!("[Cache:{}] Capacity reached, evicted {}", self.name, oldest);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|d| now + d),
                created_at: now,
            },
        );
    }

    /// Remove a key; returns whether it was present
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of stored entries, expired or not
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop every expired entry; returns how many went
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

/// Registry of named stores
pub struct CacheManager {
    stores: RwLock<HashMap<String, Arc<CacheStore>>>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            capacity: config.capacity,
            default_ttl: config.default_ttl_secs.map(Duration::from_secs),
        }
    }

    /// Get a store by name, creating it on first use
    pub async fn store(&self, name: &str) -> Arc<CacheStore> {
        {
            let stores = self.stores.read().await;
            if let Some(store) = stores.get(name) {
                return store.clone();
            }
        }

        let mut stores = self.stores.write().await;
        stores
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("[Cache] Creating store {}", name);
                Arc::new(CacheStore::new(name, self.capacity, self.default_ttl))
            })
            .clone()
    }

    /// Read one key from a named store without creating the store
    pub async fn get(&self, store_name: &str, key: &str) -> Option<Value> {
        let store = self.stores.read().await.get(store_name).cloned()?;
        store.get(key).await
    }

    pub async fn store_names(&self) -> Vec<String> {
        self.stores.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = CacheStore::new("t", 10, None);
        store.set("a", json!({"x": 1}), None).await;
        assert_eq!(store.get("a").await, Some(json!({"x": 1})));
        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
        assert_eq!(store.get("a").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_removes_entry() {
        let store = CacheStore::new("t", 10, None);
        store.set("a", json!(1), Some(Duration::from_secs(5))).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.get("a").await, Some(json!(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("a").await, None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_created() {
        let store = CacheStore::new("t", 2, None);
        store.set("first", json!(1), None).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        store.set("second", json!(2), None).await;
        tokio::time::advance(Duration::from_millis(10)).await;

        // Reading "first" does not protect it: eviction is by creation time
        assert!(store.get("first").await.is_some());
        store.set("third", json!(3), None).await;

        assert_eq!(store.get("first").await, None);
        assert_eq!(store.get("second").await, Some(json!(2)));
        assert_eq!(store.get("third").await, Some(json!(3)));

        // Overwriting an existing key never evicts
        store.set("second", json!(22), None).await;
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = CacheStore::new("t", 10, Some(Duration::from_secs(1)));
        store.set("a", json!(1), None).await;
        store.set("b", json!(2), Some(Duration::from_secs(60))).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_manager_creates_stores_lazily() {
        let manager = CacheManager::new(&CacheConfig::default());
        assert_eq!(manager.get("router_stats", "10.0.0.1").await, None);
        assert!(manager.store_names().await.is_empty());

        let store = manager.store("router_stats").await;
        store.set("10.0.0.1", json!({"ok": true}), None).await;

        let again = manager.store("router_stats").await;
        assert!(Arc::ptr_eq(&store, &again));
        assert_eq!(
            manager.get("router_stats", "10.0.0.1").await,
            Some(json!({"ok": true}))
        );
    }
}

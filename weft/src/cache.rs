//! Cache abstraction for the model catalog and other expensive lookups.
//!
//! The production backend (Redis) is an external collaborator; it plugs in
//! behind [`Cache`]. Shipped implementations: [`InMemoryCache`] for a single
//! process and [`NoopCache`] when `ENABLE_CACHE` is off.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// Key-value cache of JSON payloads with optional TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a value by key. Returns `None` if missing or expired.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Set a value, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Remove a key.
    async fn delete(&self, key: &str);
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Process-local cache backed by a `HashMap`. Expired entries are dropped
/// lazily on read.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at.map_or(true, |t| Instant::now() < t) => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict under the write lock.
        self.entries.write().await.remove(key);
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

/// No-op cache used when caching is disabled by feature toggle.
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) {}

    async fn delete(&self, _key: &str) {}
}

/// Pick the cache backend for the given toggle.
pub fn cache_for(enabled: bool) -> Arc<dyn Cache> {
    if enabled {
        Arc::new(InMemoryCache::new())
    } else {
        Arc::new(NoopCache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let cache = InMemoryCache::new();
        cache.set("k", json!({"a": 1}), None).await;
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = InMemoryCache::new();
        cache
            .set("k", json!(1), Some(Duration::from_millis(10)))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn noop_cache_returns_nothing() {
        let cache = NoopCache;
        cache.set("k", json!(1), None).await;
        assert_eq!(cache.get("k").await, None);
    }
}

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_live(&self) -> bool {
        self.inserted.elapsed() < self.ttl
    }
}

/// In-memory map whose entries disappear after a TTL.
///
/// Expired entries are never returned; they are dropped lazily by
/// [`TimedCache::prune_expired`] and on overwrite.
#[derive(Debug)]
pub struct TimedCache<K, V> {
    ttl_ms: AtomicU64,
    map: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Change the default TTL used by future [`TimedCache::set`] calls.
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let map = self.map.read().await;
        map.get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone())
    }

    pub async fn contains(&self, key: &K) -> bool {
        let map = self.map.read().await;
        map.get(key).is_some_and(CacheEntry::is_live)
    }

    pub async fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.ttl()).await;
    }

    /// Insert with an explicit TTL. A zero TTL stores nothing.
    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let mut map = self.map.write().await;
        map.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove an entry, returning it if it was still live.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut map = self.map.write().await;
        map.remove(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value)
    }

    pub async fn clear(&self) {
        self.map.write().await.clear();
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let map = self.map.read().await;
        map.values().filter(|entry| entry.is_live()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries and return how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let mut map = self.map.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.is_live());
        before - map.len()
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// The lock is not held while `init` runs, so two concurrent misses may
    /// both compute; the later value wins. Errors are returned as-is and
    /// nothing is cached for them.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key).await {
            return Ok(hit);
        }

        let value = init().await?;
        self.set(key, value.clone()).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_cache_get_set() {
        let cache = TimedCache::new(Duration::from_millis(50));
        cache.set("key", "value").await;
        assert_eq!(cache.get(&"key").await, Some("value"));
        assert!(cache.contains(&"key").await);
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = TimedCache::new(Duration::from_millis(10));
        cache.set("key", "value").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&"key").await, None);
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.prune_expired().await, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_stores_nothing() {
        let cache = TimedCache::new(Duration::ZERO);
        cache.set("key", 1).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let cache = TimedCache::new(Duration::from_millis(10));
        cache
            .set_with_ttl("long", 1, Duration::from_secs(60))
            .await;
        cache.set("short", 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&"long").await, Some(1));
        assert_eq!(cache.get(&"short").await, None);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = TimedCache::new(Duration::from_secs(60));
        cache.set(1u64, "a").await;
        cache.set(2u64, "b").await;
        assert_eq!(cache.remove(&1).await, Some("a"));
        assert_eq!(cache.remove(&1).await, None);
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_computes_once() {
        let cache = TimedCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u32, String> = cache
                .get_or_try_insert_with("answer", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(value, Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_does_not_cache_errors() {
        let cache: TimedCache<&str, u32> = TimedCache::new(Duration::from_secs(60));

        let first: Result<u32, String> = cache
            .get_or_try_insert_with("k", || async { Err("boom".to_string()) })
            .await;
        assert_eq!(first, Err("boom".to_string()));
        assert!(!cache.contains(&"k").await);

        let second: Result<u32, String> =
            cache.get_or_try_insert_with("k", || async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
    }
}

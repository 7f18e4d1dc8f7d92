//! TTL cache for finished assessments, keyed by change fingerprint.
//!
//! The store and the clock are both injected so tests control time and the
//! engine can swap backends without touching eviction logic. Expiry is lazy:
//! a stale entry sits in the store until the next read of its key.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use gauge_core::{SCHEMA_VERSION, unix_timestamp_secs};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
}

pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        unix_timestamp_secs()
    }
}

/// Test clock advanced by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub schema_version: u32,
    pub stored_at: i64,
    pub ttl_seconds: i64,
    pub value: T,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.stored_at.saturating_add(self.ttl_seconds)
    }
}

#[async_trait]
pub trait CacheStore<T>: Send + Sync
where
    T: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError>;
    async fn put(&self, key: &str, entry: CacheEntry<T>) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

pub struct MemoryCacheStore<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for MemoryCacheStore<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> MemoryCacheStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T> CacheStore<T> for MemoryCacheStore<T>
where
    T: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry<T>) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// TTL and schema policy over an injected store. Writes stamp the current
/// schema version; reads treat expired or cross-version entries as misses
/// and evict them in passing.
pub struct ResultCache<T>
where
    T: Clone + Send + Sync,
{
    store: Arc<dyn CacheStore<T>>,
    clock: Arc<dyn Clock>,
    ttl_seconds: i64,
}

impl<T> ResultCache<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(store: Arc<dyn CacheStore<T>>, clock: Arc<dyn Clock>, ttl_seconds: i64) -> Self {
        Self {
            store,
            clock,
            ttl_seconds: ttl_seconds.max(1),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(entry) = self.store.get(key).await? else {
            return Ok(None);
        };

        if entry.schema_version != SCHEMA_VERSION {
            tracing::debug!(
                key,
                found = entry.schema_version,
                current = SCHEMA_VERSION,
                "evicting cache entry from another schema version"
            );
            self.store.remove(key).await?;
            return Ok(None);
        }

        if entry.is_expired(self.clock.now_unix()) {
            tracing::debug!(key, "evicting expired cache entry");
            self.store.remove(key).await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    /// Stores the value under the key, replacing whatever was there.
    pub async fn put(&self, key: &str, value: T) -> Result<(), CacheError> {
        let entry = CacheEntry {
            schema_version: SCHEMA_VERSION,
            stored_at: self.clock.now_unix(),
            ttl_seconds: self.ttl_seconds,
            value,
        };
        self.store.put(key, entry).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_clock(ttl_seconds: i64) -> (ResultCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(1_000));
        let cache = ResultCache::new(
            Arc::new(MemoryCacheStore::new()),
            clock.clone(),
            ttl_seconds,
        );
        (cache, clock)
    }

    #[tokio::test]
    async fn put_then_get_returns_the_value_within_ttl() {
        let (cache, clock) = cache_with_clock(60);

        cache.put("fp-1", "cached".to_owned()).await.expect("put");
        clock.advance(59);

        assert_eq!(
            cache.get("fp-1").await.expect("get"),
            Some("cached".to_owned())
        );
    }

    #[tokio::test]
    async fn entries_expire_exactly_at_the_ttl_boundary() {
        let (cache, clock) = cache_with_clock(60);

        cache.put("fp-1", "cached".to_owned()).await.expect("put");
        clock.advance(60);

        assert_eq!(cache.get("fp-1").await.expect("get"), None);
        // Lazy eviction removed the entry; later reads stay misses.
        assert_eq!(cache.get("fp-1").await.expect("get again"), None);
    }

    #[tokio::test]
    async fn a_fresh_put_fully_replaces_the_old_value_and_ttl() {
        let (cache, clock) = cache_with_clock(60);

        cache.put("fp-1", "old".to_owned()).await.expect("put old");
        clock.advance(50);
        cache.put("fp-1", "new".to_owned()).await.expect("put new");
        clock.advance(50);

        assert_eq!(
            cache.get("fp-1").await.expect("get"),
            Some("new".to_owned())
        );
    }

    #[tokio::test]
    async fn entries_from_another_schema_version_read_as_misses() {
        let store: Arc<MemoryCacheStore<String>> = Arc::new(MemoryCacheStore::new());
        let clock = Arc::new(ManualClock::at(1_000));
        let cache = ResultCache::new(store.clone(), clock, 60);

        store
            .put(
                "fp-1",
                CacheEntry {
                    schema_version: SCHEMA_VERSION + 1,
                    stored_at: 1_000,
                    ttl_seconds: 60,
                    value: "incompatible".to_owned(),
                },
            )
            .await
            .expect("seed store");

        assert_eq!(cache.get("fp-1").await.expect("get"), None);
        assert_eq!(store.get("fp-1").await.expect("raw get"), None);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (cache, _clock) = cache_with_clock(60);

        cache.put("fp-1", "cached".to_owned()).await.expect("put");
        cache.remove("fp-1").await.expect("remove");
        cache.remove("fp-1").await.expect("remove again");

        assert_eq!(cache.get("fp-1").await.expect("get"), None);
    }
}

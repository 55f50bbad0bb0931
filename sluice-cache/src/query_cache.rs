//! In-memory query cache that SLUICE flushes evict from.
//!
//! Entries live in an ordered map keyed by [`CacheKey`]. Because keys order
//! lexicographically by part, every key sharing a family prefix sits in one
//! contiguous range, so family eviction is a range scan rather than a full
//! table walk.
//!
//! A fetch started by [`InMemoryQueryCache::get_or_fetch`] is tracked until
//! its value is stored. An invalidation that covers the key while the fetch is
//! running bumps the key's generation, and the late value is then stored stale
//! (or dropped in [`EvictionMode::Remove`]) instead of resurrecting the row the
//! invalidation meant to evict.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_core::{CacheKey, InvalidationExecutor, SluiceResult, TopicKey};
use tokio::sync::RwLock;

use crate::entry::CachedQuery;

/// What invalidation does to matching entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    /// Drop matching entries.
    #[default]
    Remove,
    /// Keep matching entries but flag them stale.
    MarkStale,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that found a fresh entry.
    pub hits: u64,
    /// Reads that found nothing or a stale entry.
    pub misses: u64,
    /// Entries currently stored, stale ones included.
    pub entry_count: u64,
    /// Entries currently flagged stale.
    pub stale_count: u64,
    /// Entries removed or marked stale by invalidation.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Reactive query cache host backed by a `BTreeMap`.
#[derive(Debug)]
pub struct InMemoryQueryCache {
    entries: RwLock<BTreeMap<CacheKey, CachedQuery>>,
    mode: EvictionMode,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    in_flight: Mutex<HashMap<CacheKey, InFlightFetch>>,
}

/// Fetches running for one key and the invalidations seen since they began.
#[derive(Debug, Default)]
struct InFlightFetch {
    fetchers: usize,
    generation: u64,
}

/// Registration of one running fetch. Dropping it without
/// [`FetchGuard::finish`] (failed or cancelled fetch) unregisters silently.
struct FetchGuard<'a> {
    cache: &'a InMemoryQueryCache,
    key: Option<CacheKey>,
    generation: u64,
}

impl FetchGuard<'_> {
    /// Unregister and report whether an invalidation covered the key meanwhile.
    fn finish(mut self) -> bool {
        match self.key.take() {
            Some(key) => self.cache.end_fetch(&key) != self.generation,
            None => false,
        }
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.end_fetch(&key);
        }
    }
}

impl Default for InMemoryQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueryCache {
    pub fn new() -> Self {
        Self::with_mode(EvictionMode::default())
    }

    pub fn with_mode(mode: EvictionMode) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            mode,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> EvictionMode {
        self.mode
    }

    /// Read an entry.
    ///
    /// Stale entries are returned (check [`CachedQuery::is_stale`]) but
    /// counted as misses.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedQuery> {
        let entries = self.entries.read().await;
        let entry = entries.get(key).cloned();
        match &entry {
            Some(found) if !found.is_stale() => self.hits.fetch_add(1, Ordering::Relaxed),
            _ => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        entry
    }

    /// Store a fresh value, returning the entry it replaced.
    pub async fn put(&self, key: CacheKey, value: serde_json::Value) -> Option<CachedQuery> {
        self.entries
            .write()
            .await
            .insert(key, CachedQuery::new(value))
    }

    /// Return the fresh cached value or fetch and store a new one.
    ///
    /// Missing and stale entries both trigger `fetch`. A failed fetch leaves
    /// the cache untouched. If an invalidation covers `key` while `fetch` is
    /// running, the fetched value is still returned but is stored stale in
    /// [`EvictionMode::MarkStale`] and not stored at all in
    /// [`EvictionMode::Remove`].
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> SluiceResult<serde_json::Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SluiceResult<serde_json::Value>>,
    {
        if let Some(entry) = self.get(key).await {
            if !entry.is_stale() {
                return Ok(entry.into_value());
            }
        }

        let guard = self.begin_fetch(key);
        let value = fetch().await?;

        let mut entries = self.entries.write().await;
        if !guard.finish() {
            entries.insert(key.clone(), CachedQuery::new(value.clone()));
        } else if self.mode == EvictionMode::MarkStale {
            let mut entry = CachedQuery::new(value.clone());
            entry.mark_stale();
            entries.insert(key.clone(), entry);
        } else {
            tracing::debug!(key = %key, "Dropped value fetched across an invalidation");
        }
        Ok(value)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, InFlightFetch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_fetch(&self, key: &CacheKey) -> FetchGuard<'_> {
        let mut in_flight = self.in_flight();
        let fetch = in_flight.entry(key.clone()).or_default();
        fetch.fetchers += 1;
        FetchGuard {
            cache: self,
            key: Some(key.clone()),
            generation: fetch.generation,
        }
    }

    /// Mark every running fetch `key` covers as crossed by an invalidation.
    fn bump_in_flight(&self, key: &TopicKey) {
        for (fetching, fetch) in self.in_flight().iter_mut() {
            if key.matches(fetching) {
                fetch.generation += 1;
            }
        }
    }

    /// Unregister one fetcher, returning the key's current generation.
    fn end_fetch(&self, key: &CacheKey) -> u64 {
        let mut in_flight = self.in_flight();
        let Some(fetch) = in_flight.get_mut(key) else {
            return 0;
        };
        let generation = fetch.generation;
        fetch.fetchers = fetch.fetchers.saturating_sub(1);
        if fetch.fetchers == 0 {
            in_flight.remove(key);
        }
        generation
    }

    /// Apply the eviction mode to every entry `key` covers.
    ///
    /// Returns the number of entries removed or newly marked stale.
    pub async fn invalidate(&self, key: &TopicKey) -> u64 {
        let mut entries = self.entries.write().await;
        let matched = matching_keys(&entries, key);
        self.bump_in_flight(key);

        let mut affected = 0u64;
        for cache_key in &matched {
            let changed = match self.mode {
                EvictionMode::Remove => entries.remove(cache_key).is_some(),
                EvictionMode::MarkStale => entries
                    .get_mut(cache_key)
                    .map(CachedQuery::mark_stale)
                    .unwrap_or(false),
            };
            if changed {
                affected += 1;
            }
        }

        self.evictions.fetch_add(affected, Ordering::Relaxed);
        affected
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every entry. Counters are kept.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            stale_count: entries.values().filter(|e| e.is_stale()).count() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

fn matching_keys(entries: &BTreeMap<CacheKey, CachedQuery>, key: &TopicKey) -> Vec<CacheKey> {
    match key {
        TopicKey::Exact(exact) => entries
            .contains_key(exact)
            .then(|| exact.clone())
            .into_iter()
            .collect(),
        TopicKey::Family(prefix) => entries
            .range(prefix.clone()..)
            .take_while(|(candidate, _)| candidate.starts_with(prefix))
            .map(|(candidate, _)| candidate.clone())
            .collect(),
    }
}

#[async_trait]
impl InvalidationExecutor for InMemoryQueryCache {
    async fn evict(&self, key: &TopicKey) -> SluiceResult<()> {
        let affected = self.invalidate(key).await;
        tracing::debug!(key = %key, affected, mode = ?self.mode, "Invalidated cached queries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::{ExecutorError, KeyPart};
    use std::sync::Arc;
    use std::time::Duration;

    fn key(parts: Vec<KeyPart>) -> CacheKey {
        CacheKey::new(parts)
    }

    fn beneficiary(id: i64) -> CacheKey {
        key(vec!["beneficiary".into(), id.into()])
    }

    async fn seeded(mode: EvictionMode) -> InMemoryQueryCache {
        let cache = InMemoryQueryCache::with_mode(mode);
        cache.put(CacheKey::from(["beneficiaries"]), json!([1, 2])).await;
        cache.put(beneficiary(1), json!({"id": 1})).await;
        cache.put(beneficiary(2), json!({"id": 2})).await;
        cache.put(CacheKey::from(["beneficiary-notes"]), json!([])).await;
        cache
    }

    #[tokio::test]
    async fn test_get_counts_hits_and_misses() {
        let cache = seeded(EvictionMode::Remove).await;
        assert!(cache.get(&beneficiary(1)).await.is_some());
        assert!(cache.get(&beneficiary(9)).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 4);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_family_eviction_only_touches_prefix() {
        let cache = seeded(EvictionMode::Remove).await;
        let family = TopicKey::Family(CacheKey::from(["beneficiary"]));

        assert_eq!(cache.invalidate(&family).await, 2);
        assert!(cache.get(&beneficiary(1)).await.is_none());
        assert!(cache.get(&CacheKey::from(["beneficiaries"])).await.is_some());
        assert!(cache.get(&CacheKey::from(["beneficiary-notes"])).await.is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_exact_eviction_ignores_family_members() {
        let cache = seeded(EvictionMode::Remove).await;
        let exact = TopicKey::Exact(CacheKey::from(["beneficiary"]));

        assert_eq!(cache.invalidate(&exact).await, 0);
        assert_eq!(cache.len().await, 4);
    }

    #[tokio::test]
    async fn test_mark_stale_keeps_values() {
        let cache = seeded(EvictionMode::MarkStale).await;
        cache
            .evict(&TopicKey::Family(CacheKey::from(["beneficiary"])))
            .await
            .unwrap();

        let entry = cache.get(&beneficiary(2)).await.unwrap();
        assert!(entry.is_stale());
        assert_eq!(entry.value(), &json!({"id": 2}));

        // Marking an already stale entry again is not a new eviction.
        assert_eq!(
            cache
                .invalidate(&TopicKey::Family(CacheKey::from(["beneficiary"])))
                .await,
            0
        );
        let stats = cache.stats().await;
        assert_eq!(stats.stale_count, 2);
        assert_eq!(stats.evictions, 2);
    }

    #[tokio::test]
    async fn test_get_or_fetch_refetches_stale_entry() {
        let cache = seeded(EvictionMode::MarkStale).await;
        let key = CacheKey::from(["beneficiaries"]);

        let cached = cache
            .get_or_fetch(&key, || async { Ok(json!("unused")) })
            .await
            .unwrap();
        assert_eq!(cached, json!([1, 2]));

        cache.invalidate(&TopicKey::Exact(key.clone())).await;
        let refreshed = cache
            .get_or_fetch(&key, || async { Ok(json!([1, 2, 3])) })
            .await
            .unwrap();
        assert_eq!(refreshed, json!([1, 2, 3]));
        assert!(!cache.get(&key).await.unwrap().is_stale());
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_entry_stale() {
        let cache = seeded(EvictionMode::MarkStale).await;
        let key = CacheKey::from(["beneficiaries"]);
        cache.invalidate(&TopicKey::Exact(key.clone())).await;

        let result = cache
            .get_or_fetch(&key, || async {
                Err(ExecutorError::EvictionFailed {
                    key: "beneficiaries".to_string(),
                    reason: "backend down".to_string(),
                }
                .into())
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get(&key).await.unwrap().is_stale());
    }

    /// Run a 50 ms fetch of `key` and apply `evicted` 10 ms into it.
    async fn evict_during_slow_fetch(
        cache: &Arc<InMemoryQueryCache>,
        key: &CacheKey,
        evicted: TopicKey,
    ) -> serde_json::Value {
        let fetching = {
            let cache = Arc::clone(cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({"balance": "old"}))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.evict(&evicted).await.unwrap();
        fetching.await.unwrap().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_during_fetch_stores_value_stale() {
        let cache = Arc::new(InMemoryQueryCache::with_mode(EvictionMode::MarkStale));
        let key = CacheKey::from(["trial-balance"]);

        let value = evict_during_slow_fetch(&cache, &key, TopicKey::Exact(key.clone())).await;
        assert_eq!(value, json!({"balance": "old"}));

        let entry = cache.get(&key).await.unwrap();
        assert!(entry.is_stale());
        assert_eq!(entry.value(), &json!({"balance": "old"}));
        assert!(cache.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_during_fetch_in_remove_mode_skips_store() {
        let cache = Arc::new(InMemoryQueryCache::new());
        let key = CacheKey::from(["trial-balance"]);

        let value = evict_during_slow_fetch(&cache, &key, TopicKey::Exact(key.clone())).await;
        assert_eq!(value, json!({"balance": "old"}));
        assert!(cache.get(&key).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_family_eviction_during_fetch_is_not_lost() {
        let cache = Arc::new(InMemoryQueryCache::with_mode(EvictionMode::MarkStale));
        let key = beneficiary(3);
        let family = TopicKey::Family(CacheKey::from(["beneficiary"]));

        evict_during_slow_fetch(&cache, &key, family).await;
        assert!(cache.get(&key).await.unwrap().is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_eviction_during_fetch_stores_fresh() {
        let cache = Arc::new(InMemoryQueryCache::with_mode(EvictionMode::MarkStale));
        let key = CacheKey::from(["trial-balance"]);
        let unrelated = TopicKey::Family(CacheKey::from(["beneficiary"]));

        evict_during_slow_fetch(&cache, &key, unrelated).await;
        assert!(!cache.get(&key).await.unwrap().is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_or_cancelled_fetch_unregisters() {
        let cache = Arc::new(InMemoryQueryCache::with_mode(EvictionMode::MarkStale));
        let key = CacheKey::from(["trial-balance"]);

        let failed = cache
            .get_or_fetch(&key, || async {
                Err(ExecutorError::EvictionFailed {
                    key: "trial-balance".to_string(),
                    reason: "backend down".to_string(),
                }
                .into())
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.in_flight().is_empty());

        let cancelled = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(json!("never"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.in_flight().len(), 1);
        cancelled.abort();
        assert!(cancelled.await.unwrap_err().is_cancelled());
        assert!(cache.in_flight().is_empty());

        // No generation carries over into the next fetch.
        cache.invalidate(&TopicKey::Exact(key.clone())).await;
        cache
            .get_or_fetch(&key, || async { Ok(json!({"balance": "new"})) })
            .await
            .unwrap();
        assert!(!cache.get(&key).await.unwrap().is_stale());
    }
}

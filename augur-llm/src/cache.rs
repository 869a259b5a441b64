//! Content-addressed response cache
//!
//! Entries are keyed by `(prompt hash, call type)` and expire after the TTL
//! configured for their call type. Capacity is bounded; inserting into a
//! full cache evicts the least-recently-used entry. Expired entries are
//! removed lazily on lookup.

use augur_core::{AugurConfig, CallType, GenerationResponse, PromptHash};
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

type CacheKey = (PromptHash, CallType);

#[derive(Debug, Clone)]
struct CacheEntry {
    response: GenerationResponse,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) <= self.ttl
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, including expired entries.
    pub misses: u64,
    /// Entries removed to make room for a new one.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Number of entries currently in cache.
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`; zero when there were no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded LRU cache of successful provider responses.
pub struct ResponseCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttls: HashMap<CallType, Duration>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResponseCache {
    /// Create a cache with the given capacity and per-call-type TTLs.
    ///
    /// Call types missing from `ttls` are never cached.
    pub fn new(capacity: usize, ttls: HashMap<CallType, Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttls,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &AugurConfig) -> Self {
        let ttls = CallType::all()
            .into_iter()
            .map(|call_type| (call_type, config.ttl_for(call_type)))
            .collect();
        let mut cache = Self::new(config.cache.capacity, ttls);
        cache.enabled = config.cache.enabled;
        cache
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        let mut cache = Self::new(1, HashMap::new());
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a fresh entry, refreshing its recency.
    pub fn lookup(&self, prompt_hash: &str, call_type: CallType) -> Option<GenerationResponse> {
        if !self.enabled {
            return None;
        }

        let key = (prompt_hash.to_string(), call_type);
        let now = Instant::now();
        let mut entries = self.lock();

        let found = entries
            .get(&key)
            .map(|entry| entry.is_fresh(now).then(|| entry.response.clone()));
        let fresh = match found {
            Some(Some(response)) => Some(response),
            Some(None) => {
                entries.pop(&key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };

        match fresh {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a response. Failed responses and uncached call types are ignored.
    ///
    /// Returns true if the response was stored.
    pub fn insert(&self, prompt_hash: &str, call_type: CallType, response: &GenerationResponse) -> bool {
        if !self.enabled || !response.success {
            return false;
        }
        let Some(ttl) = self.ttls.get(&call_type).copied().filter(|ttl| !ttl.is_zero()) else {
            return false;
        };

        let key = (prompt_hash.to_string(), call_type);
        let entry = CacheEntry {
            response: response.clone(),
            created_at: Instant::now(),
            ttl,
        };

        let mut entries = self.lock();
        if let Some((evicted_key, _)) = entries.push(key.clone(), entry) {
            if evicted_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(call_type = %evicted_key.1, "Evicted least-recently-used cache entry");
            }
        }
        true
    }

    /// Remove one entry. Returns true if it existed.
    pub fn invalidate(&self, prompt_hash: &str, call_type: CallType) -> bool {
        self.lock().pop(&(prompt_hash.to_string(), call_type)).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_core::compute_prompt_hash;

    fn cache(capacity: usize, ttl_secs: u64) -> ResponseCache {
        let ttls = CallType::all()
            .into_iter()
            .map(|call_type| (call_type, Duration::from_secs(ttl_secs)))
            .collect();
        ResponseCache::new(capacity, ttls)
    }

    fn response(text: &str) -> GenerationResponse {
        GenerationResponse::success(text, 10, 5, 0.01, 100)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl() {
        let cache = cache(8, 30);
        let hash = compute_prompt_hash("allocate food to farmers");
        assert!(cache.insert(&hash, CallType::Decision, &response("ok")));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.lookup(&hash, CallType::Decision).unwrap().content, "ok");
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_removed() {
        let cache = cache(8, 30);
        let hash = compute_prompt_hash("allocate food to farmers");
        cache.insert(&hash, CallType::Decision, &response("ok"));

        tokio::time::advance(Duration::from_secs(30) + Duration::from_millis(1)).await;
        assert!(cache.lookup(&hash, CallType::Decision).is_none());

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_at_exact_ttl_is_still_fresh() {
        let cache = cache(8, 30);
        let hash = compute_prompt_hash("allocate food to farmers");
        cache.insert(&hash, CallType::Decision, &response("ok"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.lookup(&hash, CallType::Decision).is_some());
        assert_eq!(cache.stats().expirations, 0);
    }

    #[tokio::test]
    async fn test_call_type_is_part_of_key() {
        let cache = cache(8, 30);
        let hash = compute_prompt_hash("the harvest");
        cache.insert(&hash, CallType::Narrative, &response("story"));
        assert!(cache.lookup(&hash, CallType::Conversation).is_none());
        assert!(cache.lookup(&hash, CallType::Narrative).is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = cache(2, 30);
        cache.insert("a", CallType::Decision, &response("a"));
        cache.insert("b", CallType::Decision, &response("b"));
        // Touch "a" so "b" becomes least recently used.
        assert!(cache.lookup("a", CallType::Decision).is_some());
        cache.insert("c", CallType::Decision, &response("c"));

        assert!(cache.lookup("b", CallType::Decision).is_none());
        assert!(cache.lookup("a", CallType::Decision).is_some());
        assert!(cache.lookup("c", CallType::Decision).is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_replacing_key_is_not_eviction() {
        let cache = cache(2, 30);
        cache.insert("a", CallType::Decision, &response("one"));
        cache.insert("a", CallType::Decision, &response("two"));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.lookup("a", CallType::Decision).unwrap().content, "two");
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = cache(2, 30);
        let failed = GenerationResponse::failure(
            augur_core::LlmError::ProviderUnavailable {
                provider: "anthropic".to_string(),
            },
            0,
        );
        assert!(!cache.insert("a", CallType::Decision, &failed));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = ResponseCache::disabled();
        assert!(!cache.insert("a", CallType::Decision, &response("a")));
        assert!(cache.lookup("a", CallType::Decision).is_none());
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = cache(4, 30);
        cache.insert("a", CallType::Decision, &response("a"));
        cache.insert("b", CallType::Decision, &response("b"));
        assert!(cache.invalidate("a", CallType::Decision));
        assert!(!cache.invalidate("a", CallType::Decision));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_from_config_uses_ttls() {
        let mut config = AugurConfig::default();
        config.cache.capacity = 3;
        let cache = ResponseCache::from_config(&config);
        assert_eq!(cache.stats().capacity, 3);
        assert_eq!(cache.ttls[&CallType::Narrative], config.ttl_for(CallType::Narrative));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_len_never_exceeds_capacity(capacity in 1usize..16, keys in prop::collection::vec("[a-z]{1,4}", 0..64)) {
            let ttls = [(CallType::Conversation, Duration::from_secs(60))].into_iter().collect();
            let cache = ResponseCache::new(capacity, ttls);
            for key in &keys {
                cache.insert(key, CallType::Conversation, &GenerationResponse::success("x", 1, 1, 0.0, 0));
            }
            prop_assert!(cache.len() <= capacity);
        }
    }
}

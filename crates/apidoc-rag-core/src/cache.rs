//! Process-lifetime memoization with least-recently-used eviction.
//!
//! [`LruMemo`] is the shared building block for both caches: the query
//! embedding cache ([`CachedEmbedder`]) and the end-to-end query result
//! cache in [`crate::retrieval::Retriever`]. Entries are keyed by exact
//! input; there is no normalisation of whitespace or case.

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::embedding::Embedder;
use crate::error::EmbedError;

/// Capacities of the two caches a [`crate::retrieval::Retriever`] owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CacheCapacity {
    #[serde(default = "default_capacity")]
    pub embedding_capacity: usize,
    #[serde(default = "default_capacity")]
    pub query_capacity: usize,
}

fn default_capacity() -> usize {
    64
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self {
            embedding_capacity: default_capacity(),
            query_capacity: default_capacity(),
        }
    }
}

/// Hit/miss counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Thread-safe bounded LRU map. A capacity of `0` disables caching.
pub struct LruMemo<K: Hash + Eq, V: Clone> {
    inner: Option<Mutex<LruCache<K, V>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq, V: Clone> LruMemo<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self
            .inner
            .as_ref()
            .and_then(|m| m.lock().ok())
            .and_then(|mut cache| cache.get(key).cloned());

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert or replace `key`, evicting the least recently used entry when
    /// full.
    pub fn put(&self, key: K, value: V) {
        if let Some(mut cache) = self.inner.as_ref().and_then(|m| m.lock().ok()) {
            cache.put(key, value);
        }
    }

    pub fn clear(&self) {
        if let Some(mut cache) = self.inner.as_ref().and_then(|m| m.lock().ok()) {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .as_ref()
            .and_then(|m| m.lock().ok())
            .map(|cache| cache.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }
}

/// Embedder wrapper that memoizes vectors by exact text.
///
/// Only misses reach the wrapped embedder; a batch with some cached members
/// sends just the uncached ones.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: LruMemo<String, Vec<f32>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: LruMemo::new(capacity),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cache.get(t)).collect();

        let missing: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();

        if !missing.is_empty() {
            let request: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_texts(&request).await?;
            if vectors.len() != request.len() {
                return Err(EmbedError::InvalidResponse(format!(
                    "expected {} vectors, got {}",
                    request.len(),
                    vectors.len()
                )));
            }
            for (i, vector) in missing.into_iter().zip(vectors) {
                self.cache.put(texts[i].clone(), vector.clone());
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| EmbedError::InvalidResponse("missing vector".into())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::test_support::MockEmbedder;

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let memo: LruMemo<&str, u32> = LruMemo::new(2);
        memo.put("a", 1);
        memo.put("b", 2);
        assert_eq!(memo.get(&"a"), Some(1));
        memo.put("c", 3);

        assert_eq!(memo.get(&"b"), None);
        assert_eq!(memo.get(&"a"), Some(1));
        assert_eq!(memo.get(&"c"), Some(3));
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let memo: LruMemo<String, u32> = LruMemo::new(0);
        memo.put("a".into(), 1);
        assert_eq!(memo.get(&"a".to_string()), None);
        assert!(memo.is_empty());
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let memo: LruMemo<u8, u8> = LruMemo::new(4);
        memo.get(&1);
        memo.put(1, 1);
        memo.get(&1);
        let stats = memo.stats();
        assert_eq!((stats.hits, stats.misses, stats.len, stats.capacity), (1, 1, 1, 4));
    }

    #[tokio::test]
    async fn test_cached_embedder_skips_repeat_calls() {
        let mock = Arc::new(MockEmbedder::new());
        let cached = CachedEmbedder::new(mock.clone(), 64);

        let first = cached.embed("spawn actor").await.unwrap();
        let second = cached.embed("spawn actor").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_embedder_sends_only_misses() {
        let mock = Arc::new(MockEmbedder::new());
        let cached = CachedEmbedder::new(mock.clone(), 64);
        cached.embed("a").await.unwrap();

        let out = cached
            .embed_texts(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(out[0], MockEmbedder::vector_for("a"));
        assert_eq!(out[1], MockEmbedder::vector_for("b"));
        assert_eq!(mock.calls(), 2);
        assert_eq!(cached.stats().len, 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mock = Arc::new(MockEmbedder::new());
        let cached = CachedEmbedder::new(mock.clone(), 64);

        assert!(cached.embed("FAIL").await.is_err());
        assert!(cached.embed("FAIL").await.is_err());
        assert_eq!(mock.calls(), 2);
    }
}

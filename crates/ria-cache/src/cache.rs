//! Similarity-keyed answer cache using moka
//!
//! Entries live in a moka cache (LRU eviction, TTL expiry) keyed by an
//! opaque entry id. A per-fingerprint partition index lists the entries a
//! lookup may consider, so a lookup only ever scores entries computed on
//! the same dataset.

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::fingerprint::DataFingerprint;
use crate::similarity::{cosine_similarity, normalize_query};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use ria_provider::{Embedding, EmbeddingProvider};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use ulid::Ulid;

/// Similarities closer than this are considered tied
const SIMILARITY_EPSILON: f32 = 1e-6;

/// Opaque cache entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EntryId(Ulid);

/// Stored answer with its lookup key material
struct CacheEntry<V> {
    id: EntryId,
    fingerprint: DataFingerprint,
    normalized_query: String,
    embedding: Embedding,
    answer: V,
    code: String,
    created_at: DateTime<Utc>,
    hit_count: AtomicU64,
}

type Partition<V> = Vec<Arc<CacheEntry<V>>>;

/// Answer served from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnswer<V> {
    /// Cached final answer
    pub answer: V,
    /// Code that produced the answer
    pub code: String,
    /// Similarity between the lookup query and the stored query
    pub similarity: f32,
    /// When the entry was stored
    pub created_at: DateTime<Utc>,
    /// Hits including this one
    pub hit_count: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Approximate number of live entries
    pub entry_count: u64,
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
}

/// Semantic answer cache
///
/// Safe to share across concurrent pipeline runs. A store never holds a
/// lock while embedding or inserting, so lookups proceed while stores are
/// in flight.
pub struct SemanticCache<V> {
    embedder: Arc<dyn EmbeddingProvider>,
    inner: Cache<EntryId, Arc<CacheEntry<V>>>,
    partitions: Arc<DashMap<DataFingerprint, Partition<V>>>,
    threshold: f32,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> SemanticCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create cache backed by the given embedding provider
    #[must_use]
    pub fn new(config: &CacheConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let partitions: Arc<DashMap<DataFingerprint, Partition<V>>> = Arc::new(DashMap::new());
        let index = Arc::clone(&partitions);

        let inner = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl())
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                move |id: Arc<EntryId>, entry: Arc<CacheEntry<V>>, cause: RemovalCause| {
                    tracing::debug!(fingerprint = %entry.fingerprint, ?cause, "cache entry removed");
                    retain_partition(&index, &entry.fingerprint, |e| e.id != *id);
                },
            )
            .build();

        Self {
            embedder,
            inner,
            partitions,
            threshold: config.similarity_threshold,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Find a cached answer for a query on the given dataset
    ///
    /// A hit requires an exact fingerprint match and a similarity at or
    /// above the configured threshold. Queries whose normalized text equals
    /// a stored query hit without calling the embedding provider. Ties on
    /// similarity go to the entry with more hits, then the newer entry.
    pub async fn lookup(
        &self,
        query: &str,
        fingerprint: &DataFingerprint,
    ) -> Option<CachedAnswer<V>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return self.miss();
        }

        let candidates = self.live_candidates(fingerprint);
        if candidates.is_empty() {
            tracing::debug!(%fingerprint, "cache miss: empty partition");
            return self.miss();
        }

        let exact: Vec<(f32, Arc<CacheEntry<V>>)> = candidates
            .iter()
            .filter(|e| e.normalized_query == normalized)
            .map(|e| (1.0, Arc::clone(e)))
            .collect();

        let scored = if exact.is_empty() {
            let embedding = match self.embedder.embed(&normalized).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!("cache lookup embedding failed, treating as miss: {}", e);
                    return self.miss();
                }
            };
            candidates
                .iter()
                .map(|e| (cosine_similarity(&embedding, &e.embedding), Arc::clone(e)))
                .filter(|(similarity, _)| *similarity >= self.threshold)
                .collect()
        } else {
            exact
        };

        let Some((similarity, entry)) = scored.into_iter().max_by(rank) else {
            tracing::debug!(%fingerprint, "cache miss: nothing above threshold");
            return self.miss();
        };

        // Touch the winner so LRU order reflects real use
        let _ = self.inner.get(&entry.id).await;

        let hit_count = entry.hit_count.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.hits.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::info!(%fingerprint, similarity, hit_count, "cache hit");

        Some(CachedAnswer {
            answer: entry.answer.clone(),
            code: entry.code.clone(),
            similarity,
            created_at: entry.created_at,
            hit_count,
        })
    }

    /// Store an answer for a query on the given dataset
    ///
    /// # Errors
    /// - `CacheError::EmptyQuery` if the query normalizes to nothing
    /// - `CacheError::Embedding` if the provider fails
    /// - `CacheError::DimensionMismatch` if the vector has the wrong length
    pub async fn store(
        &self,
        query: &str,
        fingerprint: DataFingerprint,
        answer: V,
        code: impl Into<String>,
    ) -> Result<(), CacheError> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Err(CacheError::EmptyQuery);
        }

        let embedding = self.embedder.embed(&normalized).await?;
        let expected = self.embedder.dimensions();
        if embedding.len() != expected {
            return Err(CacheError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let entry = Arc::new(CacheEntry {
            id: EntryId(Ulid::new()),
            fingerprint: fingerprint.clone(),
            normalized_query: normalized,
            embedding,
            answer,
            code: code.into(),
            created_at: Utc::now(),
            hit_count: AtomicU64::new(0),
        });

        self.inner.insert(entry.id, Arc::clone(&entry)).await;
        self.partitions.entry(fingerprint).or_default().push(entry);
        tracing::debug!("cache entry stored");

        Ok(())
    }

    /// Drop every entry computed on a dataset
    pub async fn invalidate_fingerprint(&self, fingerprint: &DataFingerprint) {
        if let Some((_, entries)) = self.partitions.remove(fingerprint) {
            for entry in entries {
                self.inner.invalidate(&entry.id).await;
            }
        }
    }

    /// Invalidate all entries
    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.partitions.clear();
    }

    /// Flush pending eviction and expiry work
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
            hits: self.hits.load(AtomicOrdering::Relaxed),
            misses: self.misses.load(AtomicOrdering::Relaxed),
        }
    }

    /// Entries of a partition that have not expired or been evicted
    fn live_candidates(&self, fingerprint: &DataFingerprint) -> Partition<V> {
        let snapshot: Partition<V> = self
            .partitions
            .get(fingerprint)
            .map(|p| p.value().clone())
            .unwrap_or_default();

        let total = snapshot.len();
        let live: Partition<V> = snapshot
            .into_iter()
            .filter(|e| self.inner.contains_key(&e.id))
            .collect();

        if live.len() < total {
            retain_partition(&self.partitions, fingerprint, |e| self.inner.contains_key(&e.id));
        }

        live
    }

    fn miss(&self) -> Option<CachedAnswer<V>> {
        self.misses.fetch_add(1, AtomicOrdering::Relaxed);
        None
    }
}

impl<V> fmt::Debug for SemanticCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticCache")
            .field("threshold", &self.threshold)
            .field("entry_count", &self.inner.entry_count())
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

/// Filter a partition in place and drop its key once nothing is left
fn retain_partition<V>(
    partitions: &DashMap<DataFingerprint, Partition<V>>,
    fingerprint: &DataFingerprint,
    keep: impl FnMut(&Arc<CacheEntry<V>>) -> bool,
) {
    if let Some(mut partition) = partitions.get_mut(fingerprint) {
        partition.retain(keep);
    }
    // the write guard above must be released before taking the shard lock again
    partitions.remove_if(fingerprint, |_, partition| partition.is_empty());
}

/// Order candidates: similarity, then hit count, then recency
fn rank<V>(a: &(f32, Arc<CacheEntry<V>>), b: &(f32, Arc<CacheEntry<V>>)) -> Ordering {
    if (a.0 - b.0).abs() > SIMILARITY_EPSILON {
        return a.0.total_cmp(&b.0);
    }
    let hits_a = a.1.hit_count.load(AtomicOrdering::SeqCst);
    let hits_b = b.1.hit_count.load(AtomicOrdering::SeqCst);
    hits_a
        .cmp(&hits_b)
        .then_with(|| a.1.created_at.cmp(&b.1.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ria_provider::ProviderError;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Embedder with fixed vectors per normalized text
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, [f32; 3])]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                table: HashMap::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail {
                return Err(ProviderError::Unavailable("offline".into()));
            }
            Ok(self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0, 0.0, 1.0]))
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    fn fp(s: &str) -> DataFingerprint {
        DataFingerprint::new(s)
    }

    fn cache_with(embedder: Arc<TableEmbedder>, threshold: f32) -> SemanticCache<String> {
        let config = CacheConfig::new().with_threshold(threshold);
        SemanticCache::new(&config, embedder)
    }

    #[tokio::test]
    async fn store_then_lookup_same_query() {
        let embedder = Arc::new(TableEmbedder::new(&[("total sales", [1.0, 0.0, 0.0])]));
        let cache = cache_with(embedder, 0.9);

        cache
            .store("Total sales", fp("ds1"), "42".to_string(), "print(42)")
            .await
            .unwrap();

        let hit = cache.lookup("total   SALES", &fp("ds1")).await.unwrap();
        assert_eq!(hit.answer, "42");
        assert_eq!(hit.code, "print(42)");
        assert_eq!(hit.hit_count, 1);
    }

    #[tokio::test]
    async fn similar_query_hits_above_threshold() {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("total sales by region", [1.0, 0.1, 0.0]),
            ("sales total per region", [1.0, 0.15, 0.0]),
            ("average basket size", [0.0, 1.0, 0.0]),
        ]));
        let cache = cache_with(embedder, 0.95);

        cache
            .store("total sales by region", fp("ds1"), "north wins".into(), "")
            .await
            .unwrap();

        let hit = cache.lookup("sales total per region", &fp("ds1")).await;
        assert_eq!(hit.map(|h| h.answer), Some("north wins".to_string()));

        let miss = cache.lookup("average basket size", &fp("ds1")).await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn never_crosses_fingerprints() {
        let embedder = Arc::new(TableEmbedder::new(&[("total sales", [1.0, 0.0, 0.0])]));
        let cache = cache_with(Arc::clone(&embedder), 0.5);

        cache
            .store("total sales", fp("ds1"), "42".into(), "")
            .await
            .unwrap();

        assert!(cache.lookup("total sales", &fp("ds2")).await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn exact_text_match_skips_embedding() {
        let embedder = Arc::new(TableEmbedder::new(&[("total sales", [1.0, 0.0, 0.0])]));
        let cache = cache_with(Arc::clone(&embedder), 0.9);

        cache
            .store("total sales", fp("ds1"), "42".into(), "")
            .await
            .unwrap();
        let calls_after_store = embedder.calls();

        assert!(cache.lookup("TOTAL sales", &fp("ds1")).await.is_some());
        assert_eq!(embedder.calls(), calls_after_store);
    }

    #[tokio::test]
    async fn empty_partition_skips_embedding() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let cache = cache_with(Arc::clone(&embedder), 0.9);

        assert!(cache.lookup("anything", &fp("ds1")).await.is_none());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn ties_prefer_hits_then_recency() {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("older question", [1.0, 0.0, 0.0]),
            ("newer question", [1.0, 0.0, 0.0]),
            ("same question", [1.0, 0.0, 0.0]),
        ]));
        let cache = cache_with(embedder, 0.9);

        cache
            .store("older question", fp("ds1"), "older".into(), "")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache
            .store("newer question", fp("ds1"), "newer".into(), "")
            .await
            .unwrap();

        // Equal similarity and hits: newest wins
        let first = cache.lookup("same question", &fp("ds1")).await.unwrap();
        assert_eq!(first.answer, "newer");

        // Give the older entry more hits than the newer one
        cache.lookup("older question", &fp("ds1")).await.unwrap();
        cache.lookup("older question", &fp("ds1")).await.unwrap();

        let second = cache.lookup("same question", &fp("ds1")).await.unwrap();
        assert_eq!(second.answer, "older");
        assert_eq!(second.hit_count, 3);
    }

    #[tokio::test]
    async fn embedding_failure_is_a_miss_on_lookup_and_error_on_store() {
        let embedder = Arc::new(TableEmbedder::failing());
        let cache = cache_with(embedder, 0.9);

        let stored = cache.store("total sales", fp("ds1"), "42".into(), "").await;
        assert!(matches!(stored, Err(CacheError::Embedding(_))));
        assert!(cache.lookup("total sales", &fp("ds1")).await.is_none());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let cache = cache_with(embedder, 0.9);

        let stored = cache.store("   ", fp("ds1"), "x".into(), "").await;
        assert!(matches!(stored, Err(CacheError::EmptyQuery)));
    }

    #[tokio::test]
    async fn capacity_bounds_entry_count() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let config = CacheConfig::new().with_capacity(2);
        let cache: SemanticCache<String> = SemanticCache::new(&config, embedder);

        for i in 0..5 {
            cache
                .store(&format!("question {i}"), fp("ds1"), i.to_string(), "")
                .await
                .unwrap();
            cache.sync().await;
        }

        assert!(cache.stats().entry_count <= 2);
    }

    #[tokio::test]
    async fn invalidate_fingerprint_removes_partition() {
        let embedder = Arc::new(TableEmbedder::new(&[("total sales", [1.0, 0.0, 0.0])]));
        let cache = cache_with(embedder, 0.9);

        cache
            .store("total sales", fp("ds1"), "42".into(), "")
            .await
            .unwrap();
        cache
            .store("total sales", fp("ds2"), "7".into(), "")
            .await
            .unwrap();

        cache.invalidate_fingerprint(&fp("ds1")).await;

        assert!(cache.lookup("total sales", &fp("ds1")).await.is_none());
        assert_eq!(
            cache.lookup("total sales", &fp("ds2")).await.map(|h| h.answer),
            Some("7".to_string())
        );
    }

    #[tokio::test]
    async fn expired_partitions_are_dropped() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let config = CacheConfig::new().with_ttl(Duration::from_secs(1));
        let cache: SemanticCache<String> = SemanticCache::new(&config, embedder);

        for ds in ["ds1", "ds2", "ds3"] {
            cache.store("total sales", fp(ds), "42".into(), "").await.unwrap();
        }
        assert_eq!(cache.partitions.len(), 3);

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        cache.sync().await;
        for ds in ["ds1", "ds2", "ds3"] {
            assert!(cache.lookup("total sales", &fp(ds)).await.is_none());
        }
        assert_eq!(cache.partitions.len(), 0);
    }

    #[tokio::test]
    async fn evicted_partitions_are_dropped() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let config = CacheConfig::new().with_capacity(2);
        let cache: SemanticCache<String> = SemanticCache::new(&config, embedder);

        for i in 0..6 {
            cache
                .store("total sales", fp(&format!("ds{i}")), i.to_string(), "")
                .await
                .unwrap();
            cache.sync().await;
        }

        assert!(cache.partitions.len() <= 2, "{} partitions left", cache.partitions.len());
        assert!(cache.partitions.iter().all(|p| !p.value().is_empty()));
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let config = CacheConfig::new().with_ttl(Duration::from_secs(1));
        let cache: SemanticCache<String> = SemanticCache::new(&config, embedder);

        cache
            .store("total sales", fp("ds1"), "42".into(), "")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1_200)).await;

        assert!(cache.lookup("total sales", &fp("ds1")).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_lookups_and_stores() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let cache: Arc<SemanticCache<String>> =
            Arc::new(cache_with(embedder, 0.99));

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let query = format!("question {}", i % 4);
                cache
                    .store(&query, fp("ds1"), i.to_string(), "")
                    .await
                    .unwrap();
                cache.lookup(&query, &fp("ds1")).await.is_some()
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(cache.stats().hits, 16);
    }
}

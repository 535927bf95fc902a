//! Tiered LRU cache with TTL and byte accounting
//!
//! Three independent regions (content / metadata / query) share one metrics
//! counter set. Each region is bounded by an item count and a byte budget,
//! both carved out of the configured totals at construction. Expiry is lazy:
//! an expired entry is removed on the `get` that observes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// Fraction of the total budget given to the content region
const CONTENT_SHARE: f64 = 0.6;
/// Fraction of the total budget given to the metadata region
const METADATA_SHARE: f64 = 0.3;
/// Fraction of the total budget given to the query region
const QUERY_SHARE: f64 = 0.1;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total byte budget across all three regions
    pub max_memory_bytes: usize,
    /// Total item budget across all three regions
    pub max_total_items: usize,
    /// Default entry TTL in seconds
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 100 * 1024 * 1024,
            max_total_items: 5_000,
            default_ttl_secs: 3_600,
        }
    }
}

impl CacheConfig {
    /// Config for a small cache, useful in tests and constrained deployments
    pub fn small(max_memory_bytes: usize, max_total_items: usize) -> Self {
        Self {
            max_memory_bytes,
            max_total_items,
            ..Default::default()
        }
    }
}

/// Cumulative hit/miss counters shared by all regions of one manager
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
    size: usize,
    last_accessed: Instant,
}

struct RegionState<T> {
    entries: LruCache<String, CacheEntry<T>>,
    current_bytes: usize,
}

/// One bounded LRU+TTL partition
///
/// Eviction happens before insertion, so an external observer never sees the
/// region over either of its bounds. Values larger than the whole byte budget
/// are not cached at all.
pub struct CacheRegion<T> {
    name: &'static str,
    max_items: usize,
    max_bytes: usize,
    default_ttl: Duration,
    state: RwLock<RegionState<T>>,
    stats: Arc<CacheStats>,
}

impl<T: Clone + Serialize> CacheRegion<T> {
    /// Create a region with explicit bounds
    pub fn new(
        name: &'static str,
        max_items: usize,
        max_bytes: usize,
        default_ttl: Duration,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            name,
            max_items: max_items.max(1),
            max_bytes: max_bytes.max(1),
            default_ttl,
            state: RwLock::new(RegionState {
                entries: LruCache::unbounded(),
                current_bytes: 0,
            }),
            stats,
        }
    }

    /// Look up a value, refreshing its recency on hit
    ///
    /// An entry past its TTL is removed here and counted as a miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let expired = match state.entries.get_mut(key) {
            Some(entry) => {
                if entry.expires_at <= now {
                    true
                } else {
                    entry.last_accessed = now;
                    self.stats.record_hit();
                    return Some(entry.value.clone());
                }
            }
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if expired {
            if let Some(entry) = state.entries.pop(key) {
                state.current_bytes -= entry.size;
                debug!(region = self.name, key, "expired entry dropped");
            }
            self.stats.record_miss();
        }
        None
    }

    /// Store a value under the region default TTL
    pub async fn set(&self, key: &str, value: T) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    /// Store a value with an explicit TTL
    ///
    /// Size is the serialized byte length measured here, at set time. LRU
    /// entries are evicted one at a time until both bounds hold, then the new
    /// entry is inserted.
    pub async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
        let size = serde_json::to_vec(&value)?.len();
        if size > self.max_bytes {
            debug!(region = self.name, key, size, "value exceeds region budget, not cached");
            return Ok(());
        }

        let now = Instant::now();
        let mut state = self.state.write().await;

        if let Some(old) = state.entries.pop(key) {
            state.current_bytes -= old.size;
        }

        while state.entries.len() >= self.max_items
            || state.current_bytes + size > self.max_bytes
        {
            match state.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    state.current_bytes -= evicted.size;
                    debug!(region = self.name, key = %evicted_key, "evicted LRU entry");
                }
                None => break,
            }
        }

        state.current_bytes += size;
        state.entries.put(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                size,
                last_accessed: now,
            },
        );
        Ok(())
    }

    /// Remove a single entry
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.write().await;
        match state.entries.pop(key) {
            Some(entry) => {
                state.current_bytes -= entry.size;
                true
            }
            None => false,
        }
    }

    /// Drop every entry in the region
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.current_bytes = 0;
    }

    /// Number of resident entries (expired-but-unevicted included)
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Accounted bytes currently resident
    pub async fn current_bytes(&self) -> usize {
        self.state.read().await.current_bytes
    }

    fn region_metrics(&self, entries: usize, bytes: usize) -> RegionMetrics {
        RegionMetrics {
            name: self.name.to_string(),
            entries,
            bytes,
            max_items: self.max_items,
            max_bytes: self.max_bytes,
        }
    }
}

/// Aggregate metrics snapshot across all regions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Hit percentage over all requests, 0.0 when nothing was requested
    pub hit_rate: f64,
    /// Resident bytes across all regions, in megabytes
    pub memory_usage_mb: f64,
    pub regions: Vec<RegionMetrics>,
}

/// Per-region occupancy snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionMetrics {
    pub name: String,
    pub entries: usize,
    pub bytes: usize,
    pub max_items: usize,
    pub max_bytes: usize,
}

/// Three-region cache manager
///
/// Region budgets are fixed at construction: 60% content, 30% metadata,
/// 10% query of the configured byte and item totals.
pub struct CacheManager<C, M, Q> {
    content: CacheRegion<C>,
    metadata: CacheRegion<M>,
    query: CacheRegion<Q>,
    stats: Arc<CacheStats>,
}

impl<C, M, Q> CacheManager<C, M, Q>
where
    C: Clone + Serialize,
    M: Clone + Serialize,
    Q: Clone + Serialize,
{
    /// Create a manager with the fixed 60/30/10 region layout
    pub fn new(config: &CacheConfig) -> Self {
        let stats = Arc::new(CacheStats::default());
        let ttl = Duration::from_secs(config.default_ttl_secs);

        let share = |fraction: f64, total: usize| ((total as f64 * fraction) as usize).max(1);

        Self {
            content: CacheRegion::new(
                "content",
                share(CONTENT_SHARE, config.max_total_items),
                share(CONTENT_SHARE, config.max_memory_bytes),
                ttl,
                stats.clone(),
            ),
            metadata: CacheRegion::new(
                "metadata",
                share(METADATA_SHARE, config.max_total_items),
                share(METADATA_SHARE, config.max_memory_bytes),
                ttl,
                stats.clone(),
            ),
            query: CacheRegion::new(
                "query",
                share(QUERY_SHARE, config.max_total_items),
                share(QUERY_SHARE, config.max_memory_bytes),
                ttl,
                stats.clone(),
            ),
            stats,
        }
    }

    pub fn content(&self) -> &CacheRegion<C> {
        &self.content
    }

    pub fn metadata(&self) -> &CacheRegion<M> {
        &self.metadata
    }

    pub fn query(&self) -> &CacheRegion<Q> {
        &self.query
    }

    /// Reset every region and the shared counters
    pub async fn clear_all(&self) {
        self.content.clear().await;
        self.metadata.clear().await;
        self.query.clear().await;
        self.stats.reset();
    }

    /// Snapshot cumulative counters and per-region occupancy
    pub async fn metrics(&self) -> CacheMetrics {
        let (content_len, content_bytes) =
            (self.content.len().await, self.content.current_bytes().await);
        let (metadata_len, metadata_bytes) =
            (self.metadata.len().await, self.metadata.current_bytes().await);
        let (query_len, query_bytes) =
            (self.query.len().await, self.query.current_bytes().await);

        let hits = self.stats.hits();
        let misses = self.stats.misses();
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            hits as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };

        let total_bytes = content_bytes + metadata_bytes + query_bytes;

        CacheMetrics {
            hits,
            misses,
            total_requests,
            hit_rate,
            memory_usage_mb: total_bytes as f64 / (1024.0 * 1024.0),
            regions: vec![
                self.content.region_metrics(content_len, content_bytes),
                self.metadata.region_metrics(metadata_len, metadata_bytes),
                self.query.region_metrics(query_len, query_bytes),
            ],
        }
    }
}

/// Deterministic content-addressed cache key
///
/// Parts are length-delimited before hashing so `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(&digest[..16])
}

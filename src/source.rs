//! Composition root wiring cache, index, batch, and pool together
//!
//! `OptimizedWikiSource` owns one instance of each primitive; nothing here is
//! shared ambient state. The caller supplies a `WikiFetcher` implementing the
//! actual wiki transport; everything else (cache-then-fetch, background
//! indexing, batch fan-out, metrics) is handled internally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::batch::{BatchConfig, BatchProcessor, QueueStats};
use crate::cache::{cache_key, CacheConfig, CacheManager, CacheMetrics};
use crate::error::Result;
use crate::index::{
    IndexConfig, IndexDocument, IndexManager, IndexStats, RebuildProgress, RebuildSummary,
    SearchOptions, SearchResults,
};
use crate::error::PerfError;
use crate::pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats};

/// Priority used for background index jobs
pub const PRIORITY_BACKGROUND: u8 = 0;
/// Default priority for caller-submitted batch fetches
pub const PRIORITY_NORMAL: u8 = 5;

/// A fetched wiki page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// Metadata record kept in the metadata cache region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    pub url: String,
    pub size: usize,
    pub fetched_at: DateTime<Utc>,
}

/// A configured wiki source to pull during rebuilds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiSourceDescriptor {
    pub name: String,
    pub url: String,
}

/// Wiki transport: pooled session plus page fetch over it
#[async_trait]
pub trait WikiFetcher: ConnectionFactory {
    async fn fetch(&self, conn: &mut Self::Conn, url: &str) -> Result<FetchedPage>;
}

/// Aggregated configuration for the whole performance layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub cache: CacheConfig,
    pub index: IndexConfig,
    pub batch: BatchConfig,
    pub pool: PoolConfig,
    /// Schedule a background index job after each successful fetch
    pub enable_indexing: bool,
}

impl PerformanceConfig {
    pub fn with_indexing() -> Self {
        Self {
            enable_indexing: true,
            ..Default::default()
        }
    }
}

/// Request-latency counters, failed requests included
#[derive(Debug, Default)]
struct LatencyRecorder {
    requests: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl LatencyRecorder {
    fn record(&self, elapsed: Duration, failed: bool) {
        let micros = elapsed.as_micros() as u64;
        self.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RequestMetrics {
        let requests = self.requests.load(Ordering::Relaxed);
        let total_micros = self.total_micros.load(Ordering::Relaxed);
        RequestMetrics {
            total: requests,
            errors: self.errors.load(Ordering::Relaxed),
            average_latency_ms: if requests > 0 {
                total_micros as f64 / requests as f64 / 1_000.0
            } else {
                0.0
            },
            max_latency_ms: self.max_micros.load(Ordering::Relaxed) as f64 / 1_000.0,
        }
    }
}

/// Request-level counters exposed in the metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub total: u64,
    pub errors: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
}

/// One merged snapshot across all primitives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub requests: RequestMetrics,
    pub cache: CacheMetrics,
    pub index: IndexStats,
    pub batch: QueueStats,
    pub pool: PoolStats,
}

/// Output of jobs scheduled on the shared batch processor
#[derive(Debug, Clone)]
pub enum JobOutput {
    Page(FetchedPage),
    Indexed(String),
}

struct SourceInner<W: WikiFetcher> {
    config: PerformanceConfig,
    cache: CacheManager<FetchedPage, PageMetadata, SearchResults>,
    index: IndexManager,
    batch: BatchProcessor<JobOutput>,
    pool: ConnectionPool<W>,
    latency: LatencyRecorder,
    destroyed: AtomicBool,
}

/// Cache-accelerated, pooled, indexed wiki content source
pub struct OptimizedWikiSource<W: WikiFetcher> {
    inner: Arc<SourceInner<W>>,
}

impl<W: WikiFetcher> OptimizedWikiSource<W> {
    pub fn new(fetcher: W, config: PerformanceConfig) -> Self {
        let inner = Arc::new(SourceInner {
            cache: CacheManager::new(&config.cache),
            index: IndexManager::new(config.index.clone()),
            batch: BatchProcessor::new(config.batch.clone()),
            pool: ConnectionPool::new(fetcher, config.pool.clone()),
            latency: LatencyRecorder::default(),
            destroyed: AtomicBool::new(false),
            config,
        });
        Self { inner }
    }

    pub fn with_defaults(fetcher: W) -> Self {
        Self::new(fetcher, PerformanceConfig::with_indexing())
    }

    /// Direct access to the index, e.g. for rebuild-progress subscriptions
    pub fn index(&self) -> &IndexManager {
        &self.inner.index
    }

    /// Subscribe to index rebuild progress events
    pub fn rebuild_progress(&self) -> watch::Receiver<RebuildProgress> {
        self.inner.index.progress()
    }

    /// Fetch a page, cache-first
    ///
    /// Latency is recorded for every request, failures included, before the
    /// error is rethrown.
    pub async fn fetch_content(&self, url: &str) -> Result<FetchedPage> {
        let start = Instant::now();
        let result = fetch_pipeline(&self.inner, url).await;
        self.inner.latency.record(start.elapsed(), result.is_err());
        result
    }

    /// Search indexed content, query-cache-first
    pub async fn search_content(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResults> {
        let start = Instant::now();
        let result = search_pipeline(&self.inner, query, options).await;
        self.inner.latency.record(start.elapsed(), result.is_err());
        result
    }

    /// Fan a URL list out as individual batch jobs
    ///
    /// Resolves once every job settles; each URL succeeds or fails
    /// independently, so partial results are expected.
    pub async fn batch_fetch_content(
        &self,
        urls: &[String],
        priority: u8,
    ) -> HashMap<String, Result<FetchedPage>> {
        let mut handles = Vec::with_capacity(urls.len());
        for url in urls {
            let inner = self.inner.clone();
            let job_url = url.clone();
            let handle = self.inner.batch.submit(
                format!("fetch:{}", url),
                priority,
                move || {
                    let inner = inner.clone();
                    let url = job_url.clone();
                    async move {
                        let page = fetch_pipeline(&inner, &url).await?;
                        Ok(JobOutput::Page(page))
                    }
                    .boxed()
                },
            );
            handles.push((url.clone(), handle));
        }

        let settled = join_all(handles.into_iter().map(|(url, handle)| async move {
            let outcome = handle.wait().await.and_then(|output| match output {
                JobOutput::Page(page) => Ok(page),
                JobOutput::Indexed(_) => Err(PerfError::JobFailed(
                    "fetch job produced an index output".to_string(),
                )),
            });
            (url, outcome)
        }))
        .await;

        settled.into_iter().collect()
    }

    /// Pull every configured source and rebuild the index from the results
    ///
    /// Sources are fetched one at a time; a failing source is skipped with a
    /// warning rather than aborting the rebuild.
    pub async fn rebuild_index(
        &self,
        sources: &[WikiSourceDescriptor],
    ) -> Result<RebuildSummary> {
        info!(sources = sources.len(), "rebuilding index from configured sources");
        let mut docs = Vec::with_capacity(sources.len());
        for source in sources {
            match fetch_remote(&self.inner, &source.url).await {
                Ok(page) => {
                    docs.push(
                        IndexDocument::new(&page.url, &page.title, &page.content)
                            .with_last_modified(page.fetched_at),
                    );
                }
                Err(err) => {
                    warn!(source = %source.name, %err, "skipping source during rebuild");
                }
            }
        }
        self.inner.index.rebuild(docs).await
    }

    /// Merged metrics snapshot across requests and all four primitives
    pub async fn get_performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            requests: self.inner.latency.snapshot(),
            cache: self.inner.cache.metrics().await,
            index: self.inner.index.stats().await,
            batch: self.inner.batch.queue_stats(),
            pool: self.inner.pool.stats(),
        }
    }

    /// Tear down the batch scheduler and the pool
    ///
    /// Idempotent; a second call is a no-op.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.batch.stop();
        self.inner.pool.close().await;
        info!("wiki source destroyed");
    }
}

/// Cache probe, pooled fetch, cache fill, optional index scheduling
async fn fetch_pipeline<W: WikiFetcher>(
    inner: &Arc<SourceInner<W>>,
    url: &str,
) -> Result<FetchedPage> {
    let key = cache_key(&["content", url]);
    if let Some(page) = inner.cache.content().get(&key).await {
        debug!(url, "content cache hit");
        return Ok(page);
    }

    let page = fetch_remote(inner, url).await?;

    inner.cache.content().set(&key, page.clone()).await?;
    inner
        .cache
        .metadata()
        .set(
            &cache_key(&["metadata", url]),
            PageMetadata {
                url: url.to_string(),
                size: page.content.len(),
                fetched_at: page.fetched_at,
            },
        )
        .await?;

    if inner.config.enable_indexing {
        schedule_index_job(inner, &page);
    }

    Ok(page)
}

/// Acquire a pooled connection and fetch through it
///
/// The guard releases the connection on every path, fetch failure included.
async fn fetch_remote<W: WikiFetcher>(
    inner: &Arc<SourceInner<W>>,
    url: &str,
) -> Result<FetchedPage> {
    let mut conn = inner.pool.acquire().await?;
    inner.pool.factory().fetch(&mut conn, url).await
}

/// Enqueue a low-priority background index job for a fetched page
fn schedule_index_job<W: WikiFetcher>(inner: &Arc<SourceInner<W>>, page: &FetchedPage) {
    let job_inner = inner.clone();
    let page = page.clone();
    inner.batch.add_job(
        format!("index:{}", page.url),
        PRIORITY_BACKGROUND,
        move || {
            let inner = job_inner.clone();
            let page = page.clone();
            async move {
                let doc = IndexDocument::new(&page.url, &page.title, &page.content)
                    .with_last_modified(page.fetched_at);
                let id = inner.index.add_entry(doc).await?;
                Ok(JobOutput::Indexed(id))
            }
            .boxed()
        },
    );
}

/// Query-cache probe, then index search, then cache fill
async fn search_pipeline<W: WikiFetcher>(
    inner: &Arc<SourceInner<W>>,
    query: &str,
    options: &SearchOptions,
) -> Result<SearchResults> {
    let fingerprint = serde_json::to_string(options)?;
    let key = cache_key(&["query", query, &fingerprint]);

    if let Some(results) = inner.cache.query().get(&key).await {
        debug!(query, "query cache hit");
        return Ok(results);
    }

    let results = inner.index.search(query, options).await;
    inner.cache.query().set(&key, results.clone()).await?;
    Ok(results)
}

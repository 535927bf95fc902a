//! # wiki-perf
//!
//! Performance core for wiki-content MCP proxies: tiered caching, full-text
//! indexing, batch scheduling, and connection pooling behind one composition
//! root.
//!
//! ## Features
//!
//! - **Tiered Cache**: three LRU+TTL regions (content/metadata/query) with
//!   byte accounting and aggregate hit/miss metrics
//! - **Inverted Index**: keyword extraction, domain filtering, ranked and
//!   fuzzy (bounded edit distance) search, batched rebuilds with progress
//!   events
//! - **Batch Scheduler**: priority queue with bounded concurrency, chunk
//!   pacing, and retry with exponential backoff
//! - **Connection Pool**: bounded pool with FIFO waiter handoff, acquire
//!   timeout, and idle reaping
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────────┐     ┌────────────────┐
//! │   MCP Server     │     │ OptimizedWikiSource │     │  Primitives    │
//! │  (external)      │     │                     │     │                │
//! │ • tool dispatch  │◄───►│ • fetch_content     │◄───►│ • CacheManager │
//! │ • wiki transport │     │ • search_content    │     │ • IndexManager │
//! │   (WikiFetcher)  │     │ • batch_fetch       │     │ • BatchProc.   │
//! └──────────────────┘     │ • rebuild_index     │     │ • ConnPool     │
//!                          └─────────────────────┘     └────────────────┘
//! ```
//!
//! The crate never talks to a wiki itself; callers implement [`WikiFetcher`]
//! for their transport and the composition root supplies caching, indexing,
//! batching, and pooling around it.

pub mod batch;
pub mod cache;
pub mod error;
pub mod index;
pub mod pool;
pub mod source;

pub use batch::{BatchConfig, BatchProcessor, JobHandle, QueueStats};
pub use cache::{cache_key, CacheConfig, CacheManager, CacheMetrics, CacheRegion};
pub use error::{PerfError, Result};
pub use index::{
    IndexConfig, IndexDocument, IndexEntry, IndexManager, IndexStats, IndexUpdate,
    SearchFilters, SearchOptions, SearchResults, SortBy,
};
pub use pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use source::{
    FetchedPage, OptimizedWikiSource, PerformanceConfig, PerformanceMetrics, WikiFetcher,
    WikiSourceDescriptor,
};

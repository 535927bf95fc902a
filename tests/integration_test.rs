//! Integration tests for cross-module consistency of the performance layer

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use wiki_perf::source::PRIORITY_NORMAL;
use wiki_perf::{
    BatchConfig, CacheConfig, ConnectionFactory, FetchedPage, IndexDocument, OptimizedWikiSource,
    PerfError, PerformanceConfig, PoolConfig, Result, SearchOptions, WikiFetcher,
    WikiSourceDescriptor,
};

/// Wiki backend double: a fixed page table plus fetch/connect counters
struct StubWiki {
    pages: HashMap<String, (String, String)>,
    connects: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl StubWiki {
    fn new(pages: &[(&str, &str, &str)]) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let fetches = Arc::new(AtomicUsize::new(0));
        let pages = pages
            .iter()
            .map(|(url, title, content)| (url.to_string(), (title.to_string(), content.to_string())))
            .collect();
        (
            Self {
                pages,
                connects: connects.clone(),
                fetches: fetches.clone(),
            },
            connects,
            fetches,
        )
    }
}

#[async_trait]
impl ConnectionFactory for StubWiki {
    type Conn = ();

    async fn create(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self, _conn: ()) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl WikiFetcher for StubWiki {
    async fn fetch(&self, _conn: &mut (), url: &str) -> Result<FetchedPage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url) {
            Some((title, content)) => Ok(FetchedPage {
                url: url.to_string(),
                title: title.clone(),
                content: content.clone(),
                fetched_at: Utc::now(),
            }),
            None => Err(PerfError::Upstream(anyhow::anyhow!("page not found: {}", url))),
        }
    }
}

fn test_config() -> PerformanceConfig {
    PerformanceConfig {
        cache: CacheConfig::small(1024 * 1024, 200),
        batch: BatchConfig {
            max_retries: 0,
            retry_base_delay_ms: 5,
            delay_between_batches_ms: 1,
            ..Default::default()
        },
        pool: PoolConfig {
            max_connections: 2,
            acquire_timeout_ms: 1_000,
            ..Default::default()
        },
        enable_indexing: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_fetch_search_roundtrip_through_background_indexing() {
    let (wiki, _, fetches) = StubWiki::new(&[(
        "https://wiki.example.com/deploy",
        "Deployment runbook",
        "Blue-green deployment steps and rollback procedure.",
    )]);
    let source = OptimizedWikiSource::new(wiki, test_config());

    source
        .fetch_content("https://wiki.example.com/deploy")
        .await
        .unwrap();

    // The index job runs on the batch scheduler; wait for it to land
    let mut indexed = false;
    for _ in 0..200 {
        if source.index().stats().await.total_entries == 1 {
            indexed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(indexed, "background index job should have completed");

    let results = source
        .search_content("deployment rollback", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.total, 1);
    assert_eq!(results.entries[0].url, "https://wiki.example.com/deploy");

    // Content was cached by the fetch, so a repeat costs no transport call
    source
        .fetch_content("https://wiki.example.com/deploy")
        .await
        .unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    source.destroy().await;
}

#[tokio::test]
async fn test_batch_fetch_shares_pool_and_cache() {
    let (wiki, connects, fetches) = StubWiki::new(&[
        ("https://wiki.example.com/a", "A", "alpha page body"),
        ("https://wiki.example.com/b", "B", "beta page body"),
        ("https://wiki.example.com/c", "C", "gamma page body"),
    ]);
    let source = OptimizedWikiSource::new(wiki, test_config());

    let urls: Vec<String> = ["a", "b", "c", "missing"]
        .iter()
        .map(|p| format!("https://wiki.example.com/{}", p))
        .collect();
    let results = source.batch_fetch_content(&urls, PRIORITY_NORMAL).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results.values().filter(|r| r.is_ok()).count(), 3);
    assert!(results["https://wiki.example.com/missing"].is_err());

    // The pool cap bounds physical connections regardless of job fan-out
    assert!(connects.load(Ordering::SeqCst) <= 2);

    // A follow-up single fetch is served from cache
    source
        .fetch_content("https://wiki.example.com/a")
        .await
        .unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 4);

    source.destroy().await;
}

#[tokio::test]
async fn test_rebuild_replaces_index_and_reports_progress() {
    let (wiki, _, _) = StubWiki::new(&[
        ("https://wiki.example.com/new1", "New one", "fresh content one"),
        ("https://wiki.example.com/new2", "New two", "fresh content two"),
    ]);
    let source = OptimizedWikiSource::new(wiki, test_config());

    // Seed the index with an entry that the rebuild must wipe
    source
        .index()
        .add_entry(IndexDocument::new(
            "https://stale.example.com/old",
            "Old",
            "stale content",
        ))
        .await
        .unwrap();

    let mut progress = source.rebuild_progress();
    let sources = vec![
        WikiSourceDescriptor {
            name: "new1".to_string(),
            url: "https://wiki.example.com/new1".to_string(),
        },
        WikiSourceDescriptor {
            name: "broken".to_string(),
            url: "https://wiki.example.com/broken".to_string(),
        },
        WikiSourceDescriptor {
            name: "new2".to_string(),
            url: "https://wiki.example.com/new2".to_string(),
        },
    ];

    let summary = source.rebuild_index(&sources).await.unwrap();
    assert_eq!(summary.indexed, 2);

    progress.changed().await.unwrap();
    assert!(progress.borrow().done);

    let stats = source.index().stats().await;
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.domains, vec!["wiki.example.com"]);

    let stale = source
        .search_content("stale", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(stale.total, 0, "rebuild must clear pre-existing entries");

    source.destroy().await;
}

#[tokio::test]
async fn test_metrics_snapshot_merges_all_components() {
    let (wiki, _, _) = StubWiki::new(&[(
        "https://wiki.example.com/m",
        "Metrics page",
        "metrics snapshot body",
    )]);
    let source = OptimizedWikiSource::new(wiki, test_config());

    source
        .fetch_content("https://wiki.example.com/m")
        .await
        .unwrap();
    source
        .fetch_content("https://wiki.example.com/m")
        .await
        .unwrap();
    let _ = source
        .fetch_content("https://wiki.example.com/absent")
        .await;

    let metrics = source.get_performance_metrics().await;
    assert_eq!(metrics.requests.total, 3);
    assert_eq!(metrics.requests.errors, 1);
    assert!(metrics.cache.hits >= 1);
    assert!(metrics.pool.total <= 2);

    // The snapshot is meant for an external monitoring layer
    let serialized = serde_json::to_string(&metrics).unwrap();
    assert!(serialized.contains("hit_rate"));

    source.destroy().await;
}

#[tokio::test]
async fn test_destroy_twice_then_operations_fail_cleanly() {
    let (wiki, _, _) = StubWiki::new(&[]);
    let source = OptimizedWikiSource::new(wiki, test_config());

    source.destroy().await;
    source.destroy().await;

    let err = source
        .fetch_content("https://wiki.example.com/x")
        .await
        .unwrap_err();
    assert!(matches!(err, PerfError::PoolClosed));
}

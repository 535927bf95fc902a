//! Priority batch-job scheduler
//!
//! Jobs drain in priority order (higher first, FIFO within a level), launched
//! in chunks of `batch_size` with a pacing delay between chunks, never
//! exceeding `concurrency` in flight. Failed executors are retried with
//! exponential backoff; exhausted jobs surface their error through
//! `get_error` and through the per-job handle.

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify, RwLock};
use tracing::{debug, warn};

use crate::error::{PerfError, Result};

/// Batch scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Jobs launched per chunk
    pub batch_size: usize,
    /// Maximum jobs in flight at once
    pub concurrency: usize,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Base delay for exponential retry backoff
    pub retry_base_delay_ms: u64,
    /// Pacing delay between chunk launches
    pub delay_between_batches_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 5,
            max_retries: 3,
            retry_base_delay_ms: 500,
            delay_between_batches_ms: 100,
        }
    }
}

/// Boxed async job body; invoked once per attempt
pub type JobExecutor<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct QueuedJob<T> {
    id: String,
    priority: u8,
    seq: u64,
    attempt: u32,
    executor: JobExecutor<T>,
}

impl<T> PartialEq for QueuedJob<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for QueuedJob<T> {}

impl<T> PartialOrd for QueuedJob<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedJob<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then lower sequence (FIFO)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Queue depth and lifetime counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queued jobs per priority level
    pub queued: BTreeMap<u8, usize>,
    pub total_queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Completion handle returned by `submit`
pub struct JobHandle<T> {
    id: String,
    rx: oneshot::Receiver<std::result::Result<T, String>>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the job to settle
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(PerfError::JobFailed(message)),
            Err(_) => Err(PerfError::JobFailed(
                "batch processor stopped before the job completed".to_string(),
            )),
        }
    }
}

type Waiters<T> = Mutex<HashMap<String, Vec<oneshot::Sender<std::result::Result<T, String>>>>>;

struct BatchInner<T> {
    config: BatchConfig,
    queue: Mutex<BinaryHeap<QueuedJob<T>>>,
    waiters: Waiters<T>,
    results: RwLock<HashMap<String, T>>,
    errors: RwLock<HashMap<String, String>>,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    seq: AtomicU64,
    stopped: AtomicBool,
    notify: Notify,
}

/// Priority job queue with bounded concurrency and retry
pub struct BatchProcessor<T> {
    inner: Arc<BatchInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> BatchProcessor<T> {
    /// Create the processor and start its scheduler task
    pub fn new(config: BatchConfig) -> Self {
        let inner = Arc::new(BatchInner {
            config,
            queue: Mutex::new(BinaryHeap::new()),
            waiters: Mutex::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
        });

        tokio::spawn(scheduler_loop(inner.clone()));
        Self { inner }
    }

    pub fn with_defaults() -> Self {
        Self::new(BatchConfig::default())
    }

    /// Fire-and-forget enqueue; completion is observed via
    /// `get_result`/`get_error`
    pub fn add_job<F>(&self, id: impl Into<String>, priority: u8, executor: F)
    where
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        self.enqueue(id.into(), priority, Arc::new(executor));
    }

    /// Enqueue and get a handle that resolves when the job settles
    pub fn submit<F>(&self, id: impl Into<String>, priority: u8, executor: F) -> JobHandle<T>
    where
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let enqueued = {
            let mut waiters = self.inner.waiters.lock().unwrap();
            waiters.entry(id.clone()).or_default().push(tx);
            drop(waiters);
            self.enqueue(id.clone(), priority, Arc::new(executor))
        };
        if !enqueued {
            // Processor already stopped; drop the registered sender so the
            // handle resolves with an error instead of hanging
            let mut waiters = self.inner.waiters.lock().unwrap();
            waiters.remove(&id);
        }
        JobHandle { id, rx }
    }

    fn enqueue(&self, id: String, priority: u8, executor: JobExecutor<T>) -> bool {
        if self.inner.stopped.load(Ordering::SeqCst) {
            warn!(id = %id, "job rejected, processor is stopped");
            return false;
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        self.inner.queue.lock().unwrap().push(QueuedJob {
            id,
            priority,
            seq,
            attempt: 0,
            executor,
        });
        self.inner.notify.notify_one();
        true
    }

    /// Result of a completed job, if any
    pub async fn get_result(&self, id: &str) -> Option<T> {
        self.inner.results.read().await.get(id).cloned()
    }

    /// Terminal error of a failed job, if any
    pub async fn get_error(&self, id: &str) -> Option<String> {
        self.inner.errors.read().await.get(id).cloned()
    }

    /// Snapshot queue depth per priority and lifetime counters
    pub fn queue_stats(&self) -> QueueStats {
        let queue = self.inner.queue.lock().unwrap();
        let mut queued: BTreeMap<u8, usize> = BTreeMap::new();
        for job in queue.iter() {
            *queued.entry(job.priority).or_insert(0) += 1;
        }
        QueueStats {
            total_queued: queue.len(),
            queued,
            running: self.inner.running.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }

    /// Stop the scheduler; in-flight jobs finish, queued jobs never launch
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

impl<T> Drop for BatchProcessor<T> {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

async fn scheduler_loop<T: Clone + Send + Sync + 'static>(inner: Arc<BatchInner<T>>) {
    loop {
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }

        let available = inner
            .config
            .concurrency
            .saturating_sub(inner.running.load(Ordering::SeqCst));

        let chunk = if available > 0 {
            let mut queue = inner.queue.lock().unwrap();
            let take = inner.config.batch_size.min(available);
            let mut chunk = Vec::with_capacity(take);
            while chunk.len() < take {
                match queue.pop() {
                    Some(job) => chunk.push(job),
                    None => break,
                }
            }
            chunk
        } else {
            Vec::new()
        };

        if chunk.is_empty() {
            inner.notify.notified().await;
            continue;
        }

        debug!(launched = chunk.len(), "launching batch chunk");
        for job in chunk {
            inner.running.fetch_add(1, Ordering::SeqCst);
            let inner = inner.clone();
            tokio::spawn(run_job(inner, job));
        }
        tokio::time::sleep(Duration::from_millis(inner.config.delay_between_batches_ms)).await;
    }
    debug!("batch scheduler stopped");
}

async fn run_job<T: Clone + Send + Sync + 'static>(inner: Arc<BatchInner<T>>, job: QueuedJob<T>) {
    let outcome = (job.executor)().await;
    inner.running.fetch_sub(1, Ordering::SeqCst);

    match outcome {
        Ok(value) => {
            inner
                .results
                .write()
                .await
                .insert(job.id.clone(), value.clone());
            inner.completed.fetch_add(1, Ordering::SeqCst);
            resolve_waiters(&inner, &job.id, Ok(value));
        }
        Err(err) => {
            let retryable =
                job.attempt < inner.config.max_retries && !inner.stopped.load(Ordering::SeqCst);
            if retryable {
                let delay = Duration::from_millis(
                    inner.config.retry_base_delay_ms * 2u64.saturating_pow(job.attempt),
                );
                debug!(id = %job.id, attempt = job.attempt + 1, %err, "retrying job after backoff");
                let inner = inner.clone();
                let mut job = job;
                job.attempt += 1;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.queue.lock().unwrap().push(job);
                    inner.notify.notify_one();
                });
            } else {
                let message = err.to_string();
                warn!(id = %job.id, %message, "job failed terminally");
                inner
                    .errors
                    .write()
                    .await
                    .insert(job.id.clone(), message.clone());
                inner.failed.fetch_add(1, Ordering::SeqCst);
                resolve_waiters(&inner, &job.id, Err(message));
            }
        }
    }
    inner.notify.notify_one();
}

fn resolve_waiters<T>(
    inner: &BatchInner<T>,
    id: &str,
    outcome: std::result::Result<T, String>,
) where
    T: Clone,
{
    let senders = inner.waiters.lock().unwrap().remove(id);
    if let Some(senders) = senders {
        for tx in senders {
            let _ = tx.send(outcome.clone());
        }
    }
}

//! Bounded async connection pool
//!
//! Connections are created by an injected factory, borrowed through an RAII
//! guard, and handed directly to the oldest waiter on release so a freed
//! connection is never re-created under contention. A background sweep
//! destroys connections that sit idle past their timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PerfError, Result};

/// Creates and tears down pooled connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Open a new connection; errors propagate to the `acquire` caller
    async fn create(&self) -> Result<Self::Conn>;

    /// Tear a connection down; failures here are logged, never propagated
    async fn destroy(&self, conn: Self::Conn) -> Result<()>;
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: usize,
    /// How long `acquire` waits for a free connection before failing
    pub acquire_timeout_ms: u64,
    /// Idle age beyond which a connection is destroyed by the sweep
    pub idle_timeout_ms: u64,
    /// Sweep cadence
    pub reap_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            idle_timeout_ms: 30_000,
            reap_interval_ms: 10_000,
        }
    }
}

/// Occupancy snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
}

struct PooledConn<C> {
    id: Uuid,
    conn: C,
    created_at: Instant,
    last_used: Instant,
}

struct Waiter<C> {
    id: Uuid,
    tx: oneshot::Sender<PooledConn<C>>,
}

struct PoolState<C> {
    idle: VecDeque<PooledConn<C>>,
    waiters: VecDeque<Waiter<C>>,
    total: usize,
    in_use: usize,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Conn>>,
    closed: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded async connection pool
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

/// Borrowed connection; dropping it returns the connection to the pool
pub struct PooledConnection<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
    slot: Option<PooledConn<F::Conn>>,
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("has_slot", &self.slot.is_some())
            .finish()
    }
}

enum AcquirePlan<C> {
    Ready(PooledConn<C>),
    Create,
    Wait(oneshot::Receiver<PooledConn<C>>, Uuid),
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool and start its idle-connection sweep
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            factory,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                total: 0,
                in_use: 0,
            }),
            closed: AtomicBool::new(false),
            reaper: Mutex::new(None),
        });

        let handle = tokio::spawn(reap_loop(Arc::downgrade(&inner)));
        *inner.reaper.lock().unwrap() = Some(handle);

        Self { inner }
    }

    pub fn with_defaults(factory: F) -> Self {
        Self::new(factory, PoolConfig::default())
    }

    /// The injected factory
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Borrow a connection
    ///
    /// Resolution order: idle connection, then fresh creation while under the
    /// limit, then FIFO wait for a release. Creation errors propagate without
    /// retry; the reserved slot is returned first.
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PerfError::PoolClosed);
        }

        let plan = {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(mut pooled) = state.idle.pop_front() {
                pooled.last_used = Instant::now();
                state.in_use += 1;
                AcquirePlan::Ready(pooled)
            } else if state.total < self.inner.config.max_connections {
                state.total += 1;
                state.in_use += 1;
                AcquirePlan::Create
            } else {
                let (tx, rx) = oneshot::channel();
                let id = Uuid::new_v4();
                state.waiters.push_back(Waiter { id, tx });
                AcquirePlan::Wait(rx, id)
            }
        };

        match plan {
            AcquirePlan::Ready(pooled) => Ok(self.guard(pooled)),
            AcquirePlan::Create => match self.inner.factory.create().await {
                Ok(conn) => {
                    let now = Instant::now();
                    debug!("created pool connection");
                    Ok(self.guard(PooledConn {
                        id: Uuid::new_v4(),
                        conn,
                        created_at: now,
                        last_used: now,
                    }))
                }
                Err(err) => {
                    let mut state = self.inner.state.lock().unwrap();
                    state.total -= 1;
                    state.in_use -= 1;
                    Err(err)
                }
            },
            AcquirePlan::Wait(rx, waiter_id) => {
                let timeout = Duration::from_millis(self.inner.config.acquire_timeout_ms);
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(pooled)) => Ok(self.guard(pooled)),
                    Ok(Err(_)) => Err(PerfError::PoolClosed),
                    Err(_) => {
                        let mut state = self.inner.state.lock().unwrap();
                        state.waiters.retain(|w| w.id != waiter_id);
                        Err(PerfError::AcquireTimeout(
                            self.inner.config.acquire_timeout_ms,
                        ))
                    }
                }
            }
        }
    }

    fn guard(&self, pooled: PooledConn<F::Conn>) -> PooledConnection<F> {
        PooledConnection {
            inner: self.inner.clone(),
            slot: Some(pooled),
        }
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().unwrap();
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            in_use: state.in_use,
            waiting: state.waiters.len(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Shut the pool down
    ///
    /// Rejects every waiter, destroys idle connections, and stops the sweep.
    /// Safe to call more than once; concurrent acquires fail fast once the
    /// closed flag is set.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing connection pool");

        let (waiters, idle) = {
            let mut state = self.inner.state.lock().unwrap();
            let waiters = std::mem::take(&mut state.waiters);
            let idle = std::mem::take(&mut state.idle);
            state.total -= idle.len();
            (waiters, idle)
        };

        // Dropping the senders rejects every waiter with PoolClosed
        drop(waiters);

        for pooled in idle {
            if let Err(err) = self.inner.factory.destroy(pooled.conn).await {
                warn!(%err, "connection cleanup failed during close");
            }
        }

        if let Some(handle) = self.inner.reaper.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Stable identity of the underlying connection
    pub fn id(&self) -> Uuid {
        self.slot.as_ref().expect("connection slot intact until drop").id
    }

    /// How long this connection has existed
    pub fn age(&self) -> Duration {
        self.slot
            .as_ref()
            .expect("connection slot intact until drop")
            .created_at
            .elapsed()
    }

    /// Destroy the connection instead of returning it to the pool
    ///
    /// Cleanup failures are logged and swallowed.
    pub async fn destroy(mut self) {
        if let Some(pooled) = self.slot.take() {
            {
                let mut state = self.inner.state.lock().unwrap();
                state.total -= 1;
                state.in_use -= 1;
            }
            if let Err(err) = self.inner.factory.destroy(pooled.conn).await {
                warn!(%err, "connection cleanup failed");
            }
        }
    }
}

impl<F: ConnectionFactory> std::ops::Deref for PooledConnection<F> {
    type Target = F::Conn;

    fn deref(&self) -> &F::Conn {
        &self.slot.as_ref().expect("connection slot intact until drop").conn
    }
}

impl<F: ConnectionFactory> std::ops::DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut F::Conn {
        &mut self.slot.as_mut().expect("connection slot intact until drop").conn
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(pooled) = self.slot.take() {
            release(&self.inner, pooled);
        }
    }
}

/// Return a connection to the pool, preferring the oldest live waiter
fn release<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>, mut pooled: PooledConn<F::Conn>) {
    pooled.last_used = Instant::now();

    if inner.closed.load(Ordering::SeqCst) {
        {
            let mut state = inner.state.lock().unwrap();
            state.total -= 1;
            state.in_use -= 1;
        }
        let inner = inner.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.factory.destroy(pooled.conn).await {
                warn!(%err, "connection cleanup failed after close");
            }
        });
        return;
    }

    let mut state = inner.state.lock().unwrap();
    while let Some(waiter) = state.waiters.pop_front() {
        match waiter.tx.send(pooled) {
            // Connection stays in_use; ownership moved to the waiter
            Ok(()) => return,
            // Waiter timed out; try the next one
            Err(returned) => pooled = returned,
        }
    }
    state.in_use -= 1;
    state.idle.push_back(pooled);
}

/// Periodic sweep destroying connections idle past their timeout
async fn reap_loop<F: ConnectionFactory>(inner: Weak<PoolInner<F>>) {
    let interval_ms = match inner.upgrade() {
        Some(inner) => inner.config.reap_interval_ms,
        None => return,
    };
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }

        let idle_timeout = Duration::from_millis(inner.config.idle_timeout_ms);
        let expired = {
            let mut state = inner.state.lock().unwrap();
            let mut keep = VecDeque::new();
            let mut expired = Vec::new();
            for pooled in state.idle.drain(..) {
                if pooled.last_used.elapsed() >= idle_timeout {
                    expired.push(pooled);
                } else {
                    keep.push_back(pooled);
                }
            }
            state.idle = keep;
            state.total -= expired.len();
            expired
        };

        for pooled in expired {
            debug!(id = %pooled.id, "reaping idle connection");
            if let Err(err) = inner.factory.destroy(pooled.conn).await {
                warn!(%err, "connection cleanup failed during reap");
            }
        }
    }
}

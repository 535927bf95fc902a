//! Error types for the wiki performance core

use thiserror::Error;

/// Result type alias for performance-layer operations
pub type Result<T> = std::result::Result<T, PerfError>;

/// Errors that can occur in the cache, index, batch, and pool layers
#[derive(Error, Debug)]
pub enum PerfError {
    /// Pool exhausted and no connection became free within the timeout
    #[error("connection acquire timed out after {0}ms")]
    AcquireTimeout(u64),

    /// Pool has been closed; no further acquisitions are possible
    #[error("connection pool is closed")]
    PoolClosed,

    /// An index rebuild is already running
    #[error("index rebuild already in progress")]
    RebuildInProgress,

    /// A batch job exhausted its retries
    #[error("batch job failed: {0}")]
    JobFailed(String),

    /// URL could not be parsed into a host for domain indexing
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from a caller-supplied connector, passed through unmodified
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl PerfError {
    /// Check if the caller can reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquireTimeout(_) | Self::RebuildInProgress)
    }
}

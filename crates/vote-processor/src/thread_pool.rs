//! Worker pool for asynchronous vote processing.

use savanna_core::{Task, TaskExecutor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors building the worker pool.
#[derive(Debug, Error)]
pub enum ThreadPoolError {
    #[error("Failed to build rayon thread pool: {0}")]
    RayonBuildError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Rayon pool running submitted tasks in FIFO order.
pub struct VoteThreadPool {
    pool: rayon::ThreadPool,
    /// Tasks submitted but not yet finished.
    pending: Arc<AtomicUsize>,
}

impl VoteThreadPool {
    /// Start a pool with `num_threads` workers named `vote-{i}`.
    pub fn new(num_threads: usize) -> Result<Self, ThreadPoolError> {
        if num_threads == 0 {
            return Err(ThreadPoolError::InvalidConfig(
                "num_threads must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("vote-{}", i))
            .panic_handler(|_| tracing::error!("Vote processing task panicked"))
            .build()
            .map_err(|e| ThreadPoolError::RayonBuildError(e.to_string()))?;

        tracing::info!(threads = num_threads, "Vote thread pool started");
        Ok(Self {
            pool,
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of tasks queued or running.
    pub fn queue_depth(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl TaskExecutor for VoteThreadPool {
    fn submit(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        self.pool.spawn_fifo(move || {
            task();
            pending.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

impl std::fmt::Debug for VoteThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteThreadPool")
            .field("threads", &self.pool.current_num_threads())
            .field("pending", &self.queue_depth())
            .finish()
    }
}

//! Run-ahead limiting for prefetch workers
//!
//! Each worker holds one permit per batch it has in flight (loaded but
//! not yet delivered). Permits are per worker, so a slow batch never
//! starves the worker that must produce the next in-order one, while
//! the reordering buffer stays bounded by `workers * run_ahead`. The
//! delivery channel itself provides the consumer-facing backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Per-worker run-ahead limiter with a shared pending count
#[derive(Clone)]
pub struct RunAheadLimiter {
    semaphores: Vec<Arc<Semaphore>>,
    pending: Arc<AtomicUsize>,
}

impl RunAheadLimiter {
    /// Create a limiter for `num_workers` workers, each allowed
    /// `run_ahead` undelivered batches.
    pub fn new(num_workers: usize, run_ahead: usize) -> Self {
        Self {
            semaphores: (0..num_workers)
                .map(|_| Arc::new(Semaphore::new(run_ahead)))
                .collect(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Acquire a slot for one batch. The permit travels with the batch
    /// envelope and releases on delivery.
    pub async fn acquire(&self, worker_id: usize) -> RunAheadPermit {
        let permit = self.semaphores[worker_id]
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore never closed");
        self.pending.fetch_add(1, Ordering::Relaxed);
        RunAheadPermit {
            _permit: permit,
            pending: self.pending.clone(),
        }
    }

    /// Batches currently loaded but not yet delivered
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// Permit tracking one in-flight batch; dropping it (on delivery or
/// drain) frees the worker's slot
pub struct RunAheadPermit {
    _permit: OwnedSemaphorePermit,
    pending: Arc<AtomicUsize>,
}

impl Drop for RunAheadPermit {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}

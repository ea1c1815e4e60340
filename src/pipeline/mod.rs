//! Prefetch pipeline
//!
//! Decouples corpus iteration and batch assembly from the consumer:
//! worker tasks load disjoint shards of the bucketing plan and deliver
//! finished batches over a bounded channel, re-ordered back into the
//! plan's global order before handoff.

pub mod backpressure;
pub mod prefetcher;
pub mod shutdown;

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};
use crate::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_PREFETCH_WORKERS, DEFAULT_WORKER_RUN_AHEAD};

pub use backpressure::{RunAheadLimiter, RunAheadPermit};
pub use prefetcher::PrefetchPipeline;
pub use shutdown::ShutdownSignal;

/// Configuration for the prefetch pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of prefetch worker tasks
    #[serde(default = "default_workers")]
    pub num_workers: usize,
    /// Delivery channel capacity in batches; bounds how far producers
    /// run ahead of the consumer
    #[serde(default = "default_capacity")]
    pub channel_capacity: usize,
    /// Batches one worker may have in flight (loaded, not yet
    /// delivered); bounds the reordering buffer
    #[serde(default = "default_run_ahead")]
    pub run_ahead: usize,
}

fn default_workers() -> usize {
    // Bounded by available cores so a single-core box gets one worker
    DEFAULT_PREFETCH_WORKERS.min(num_cpus::get().max(1))
}

fn default_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_run_ahead() -> usize {
    DEFAULT_WORKER_RUN_AHEAD
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: default_workers(),
            channel_capacity: default_capacity(),
            run_ahead: default_run_ahead(),
        }
    }
}

impl PipelineConfig {
    /// Validate the pipeline options.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 || self.channel_capacity == 0 || self.run_ahead == 0 {
            return Err(FeedError::Config {
                message: "num_workers, channel_capacity and run_ahead must be positive".into(),
            });
        }
        Ok(())
    }
}

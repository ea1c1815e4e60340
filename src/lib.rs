//! Seqfeed Core - Minibatch feeding pipeline for sequence training
//!
//! This crate turns variable-length labeled sequence corpora into a
//! continuous stream of fixed-shape, length-bucketed minibatches:
//! - Corpus abstraction over cached, generated and parallel-text sources
//! - Append-once binary cache with random access by sequence id
//! - Length bucketing with padding budgets and chunked windows
//! - Prefetching workers with bounded-channel backpressure

pub mod batch;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod pipeline;

pub use config::FeedConfig;
pub use error::FeedError;
pub use facade::{CorpusFacade, EpochInfo};

/// On-disk cache format version for compatibility checking
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Default number of prefetch workers
pub const DEFAULT_PREFETCH_WORKERS: usize = 2;

/// Default delivery channel capacity (batches)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Default per-worker run-ahead (batches in flight per worker)
pub const DEFAULT_WORKER_RUN_AHEAD: usize = 2;

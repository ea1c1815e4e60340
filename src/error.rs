//! Error types for the feed pipeline
//!
//! Taxonomy covering configuration, per-sequence data errors, cache
//! corruption and pipeline-level failures. End-of-epoch is not an error:
//! `next()` returns `Ok(None)` instead.

use thiserror::Error;

/// Primary error type for all feed operations
#[derive(Debug, Error)]
pub enum FeedError {
    // ========== Configuration Errors ==========

    /// Bad or contradictory options, fatal at open()
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    // ========== Per-Sequence Data Errors ==========

    /// Source-level gap for one sequence id; surfaced with the owning
    /// batch, never retried (corpora are deterministic)
    #[error("Sequence {seq_id} unavailable: {reason}")]
    DataUnavailable { seq_id: u64, reason: String },

    /// Loaded array inconsistent with the declared spec
    #[error("Shape mismatch for '{key}': expected {expected}, got {actual}")]
    ShapeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    // ========== Cache Errors ==========

    /// Bad footer, index or payload; fatal at cache open or read
    #[error("Corrupt cache: {reason}")]
    CorruptCache { reason: String },

    /// Cache file already exists or is locked by another writer
    #[error("Cache writer conflict for {path}: {reason}")]
    WriterConflict { path: String, reason: String },

    // ========== Pipeline Errors ==========

    /// Worker task died (panic or abnormal exit), triggers teardown
    #[error("Prefetch worker lost: {reason}")]
    WorkerLost { reason: String },

    /// Pipeline used outside its lifecycle (next() before start, ...)
    #[error("Pipeline not running")]
    PipelineNotRunning,

    // ========== Ambient ==========

    /// I/O error from the cache write path or a corpus source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FeedError {
    /// True if the error is local to one sequence and attached to its
    /// batch; sibling workers keep running.
    pub fn is_sequence_local(&self) -> bool {
        matches!(
            self,
            FeedError::DataUnavailable { .. } | FeedError::ShapeMismatch { .. }
        )
    }

    /// True if the error aborts the whole facade and requires an
    /// explicit close()/recovery by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::CorruptCache { .. }
                | FeedError::WorkerLost { .. }
                | FeedError::Config { .. }
        )
    }
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

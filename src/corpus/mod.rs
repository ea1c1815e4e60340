//! Corpus abstraction
//!
//! The `SequenceCorpus` trait is the fixed capability set every source
//! implements; `CorpusSpec` is the declarative locator from which each
//! prefetch worker opens its own private handle.

pub mod cached;
pub mod parallel;
pub mod sequence;
pub mod synthetic;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use cached::CachedCorpus;
pub use parallel::{ParallelTextCorpus, ParallelTextSpec};
pub use sequence::{ArraySpec, DType, NdArray, Sequence};
pub use synthetic::{SyntheticCorpus, SyntheticSpec};

/// An ordered collection of variable-length labeled sequences with
/// epoch-based iteration.
///
/// Implementations must be independently openable per worker: some
/// sources hold file or connection state that cannot be shared.
pub trait SequenceCorpus: Send {
    /// Declared array specs, in serialization order. The first spec is
    /// the primary array whose time axis defines `sequence_length`.
    fn array_specs(&self) -> &[ArraySpec];

    /// Refresh per-epoch state. Side effect only; materializes no data.
    fn init_epoch(&mut self, epoch: u64, shuffle_seed: u64) -> Result<()>;

    /// Sequence count for the current epoch, or `None` when unknown in
    /// advance (streaming/generative sources).
    fn num_sequences(&self) -> Option<u64>;

    /// Cheap time-axis length lookup, available without materializing
    /// the full arrays.
    fn sequence_length(&self, id: u64) -> Result<usize>;

    /// Materialize the full data arrays for one sequence.
    fn load_sequence(&self, id: u64) -> Result<Sequence>;

    /// Release underlying file handles or connections.
    fn close(&mut self) -> Result<()>;
}

/// Declarative corpus locator; one variant per corpus kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorpusSpec {
    /// Procedurally generated corpus, deterministic per (seed, id)
    Synthetic(SyntheticSpec),
    /// Binary cache file produced by `CacheWriter`
    Cache { path: std::path::PathBuf },
    /// Two aligned token streams per id read from line-aligned files
    ParallelText(ParallelTextSpec),
}

impl CorpusSpec {
    /// Validate the locator without opening anything expensive.
    pub fn validate(&self) -> Result<()> {
        match self {
            CorpusSpec::Synthetic(spec) => spec.validate(),
            CorpusSpec::Cache { .. } => Ok(()),
            CorpusSpec::ParallelText(spec) => spec.validate(),
        }
    }

    /// Whether a write-through cache in front of this source makes sense.
    /// A cache-backed source is already a cache.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, CorpusSpec::Cache { .. })
    }

    /// Open a private corpus handle.
    pub fn open(&self) -> Result<Box<dyn SequenceCorpus>> {
        match self {
            CorpusSpec::Synthetic(spec) => Ok(Box::new(SyntheticCorpus::open(spec.clone())?)),
            CorpusSpec::Cache { path } => Ok(Box::new(CachedCorpus::open(path)?)),
            CorpusSpec::ParallelText(spec) => {
                Ok(Box::new(ParallelTextCorpus::open(spec.clone())?))
            }
        }
    }
}

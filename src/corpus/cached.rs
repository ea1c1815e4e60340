//! Cache-backed corpus
//!
//! Serves sequences straight out of a finalized binary cache; lengths
//! come from the index without touching payloads.

use std::path::Path;

use super::sequence::{ArraySpec, Sequence};
use super::SequenceCorpus;
use crate::cache::CacheReader;
use crate::error::Result;

/// Corpus reading from a `CacheReader`
pub struct CachedCorpus {
    reader: CacheReader,
}

impl CachedCorpus {
    /// Open a cache file as a corpus.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            reader: CacheReader::open_read(path)?,
        })
    }

    /// Borrow the underlying reader
    pub fn reader(&self) -> &CacheReader {
        &self.reader
    }
}

impl SequenceCorpus for CachedCorpus {
    fn array_specs(&self) -> &[ArraySpec] {
        self.reader.array_specs()
    }

    fn init_epoch(&mut self, _epoch: u64, _shuffle_seed: u64) -> Result<()> {
        // The cache is immutable; ids and lengths never change.
        Ok(())
    }

    fn num_sequences(&self) -> Option<u64> {
        Some(self.reader.len())
    }

    fn sequence_length(&self, id: u64) -> Result<usize> {
        self.reader.sequence_length(id)
    }

    fn load_sequence(&self, id: u64) -> Result<Sequence> {
        self.reader.read_sequence(id)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

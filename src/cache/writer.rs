//! Cache write path
//!
//! Single writer per file, enforced by exclusive-create. Blocks are
//! appended only; the index and footer land at finalize time, so a
//! crash mid-write leaves a file the reader refuses to open.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::format::{self, CacheEntry, CacheIndex, Footer};
use crate::corpus::sequence::{ArraySpec, NdArray};
use crate::error::{FeedError, Result};

/// Append-only cache writer
pub struct CacheWriter {
    path: PathBuf,
    file: BufWriter<File>,
    index: CacheIndex,
    offset: u64,
    finalized: bool,
}

impl CacheWriter {
    /// Open a new cache file for writing.
    ///
    /// Fails with `WriterConflict` if the file already exists; the
    /// exclusive create is the single-writer lock.
    pub fn begin_write(path: impl AsRef<Path>, array_specs: Vec<ArraySpec>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if array_specs.is_empty() {
            return Err(FeedError::Config {
                message: "cache needs at least one array spec".into(),
            });
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    FeedError::WriterConflict {
                        path: path.display().to_string(),
                        reason: "file exists (another writer, or stale partial file)".into(),
                    }
                } else {
                    FeedError::Io(e)
                }
            })?;

        debug!("Cache writer opened {}", path.display());
        Ok(Self {
            path,
            file: BufWriter::new(file),
            index: CacheIndex::new(array_specs),
            offset: 0,
            finalized: false,
        })
    }

    /// Append one sequence and return its assigned id (monotonic).
    pub fn append_sequence(
        &mut self,
        arrays: &HashMap<String, NdArray>,
        tag: Option<&str>,
    ) -> Result<u64> {
        let mut ordered = Vec::with_capacity(self.index.array_specs.len());
        for spec in &self.index.array_specs {
            let array = arrays.get(&spec.key).ok_or_else(|| FeedError::ShapeMismatch {
                key: spec.key.clone(),
                expected: "array present".into(),
                actual: "missing".into(),
            })?;
            spec.check(array)?;
            ordered.push(array);
        }

        let (raw, shapes) = format::encode_sequence(&self.index.array_specs, &ordered);
        let crc = crc32c::crc32c(&raw);
        self.file.write_all(&raw)?;

        let id = self.index.entries.len() as u64;
        self.index.entries.push(CacheEntry {
            id,
            offset: self.offset,
            byte_len: raw.len() as u64,
            crc32c: crc,
            tag: tag.map(str::to_string),
            shapes,
        });
        self.offset += raw.len() as u64;
        Ok(id)
    }

    /// Number of sequences appended so far
    pub fn len(&self) -> usize {
        self.index.entries.len()
    }

    /// True if nothing has been appended yet
    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    /// Flush the trailing index block and footer, then fsync.
    /// The file is immutable from here on.
    pub fn finalize_write(mut self) -> Result<PathBuf> {
        let index_json = serde_json::to_vec(&self.index).map_err(|e| FeedError::Internal {
            message: format!("index serialization failed: {}", e),
        })?;
        let footer = Footer {
            index_offset: self.offset,
            index_len: index_json.len() as u64,
            index_crc32c: crc32c::crc32c(&index_json),
            version: self.index.version,
        };

        self.file.write_all(&index_json)?;
        self.file.write_all(&format::encode_footer(&footer))?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.finalized = true;

        info!(
            "Cache finalized: {} sequences, {} data bytes, {}",
            self.index.entries.len(),
            self.offset,
            self.path.display()
        );
        Ok(self.path.clone())
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if !self.finalized {
            debug!(
                "Cache writer dropped before finalize, {} stays partial",
                self.path.display()
            );
        }
    }
}

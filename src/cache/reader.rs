//! Cache read path
//!
//! Loads the footer and index once at open, then serves O(1) random
//! reads by sequence id. The file is immutable post-finalize, so any
//! number of readers may be open concurrently, each with its own
//! handle.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::format::{self, CacheIndex, FOOTER_LEN};
use crate::corpus::sequence::{ArraySpec, Sequence};
use crate::error::{FeedError, Result};

/// Random-access cache reader
pub struct CacheReader {
    path: PathBuf,
    // Seek+read state; uncontended since every worker opens its own reader.
    file: Mutex<File>,
    index: CacheIndex,
    data_len: u64,
}

impl CacheReader {
    /// Open a finalized cache file, validating footer and index.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| FeedError::CorruptCache {
            reason: format!("cannot open {}: {}", path.display(), e),
        })?;

        let file_len = file
            .metadata()
            .map_err(|e| FeedError::CorruptCache {
                reason: format!("cannot stat {}: {}", path.display(), e),
            })?
            .len();
        if file_len < FOOTER_LEN as u64 {
            return Err(FeedError::CorruptCache {
                reason: format!("file is {} bytes, smaller than the footer", file_len),
            });
        }

        let mut raw_footer = [0u8; FOOTER_LEN];
        file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))
            .and_then(|_| file.read_exact(&mut raw_footer))
            .map_err(|e| FeedError::CorruptCache {
                reason: format!("cannot read footer: {}", e),
            })?;
        let footer = format::decode_footer(&raw_footer)?;

        let data_len = file_len - FOOTER_LEN as u64;
        if footer.index_offset.checked_add(footer.index_len) != Some(data_len) {
            return Err(FeedError::CorruptCache {
                reason: format!(
                    "index range {}+{} inconsistent with file length {}",
                    footer.index_offset, footer.index_len, file_len
                ),
            });
        }

        let mut index_json = vec![0u8; footer.index_len as usize];
        file.seek(SeekFrom::Start(footer.index_offset))
            .and_then(|_| file.read_exact(&mut index_json))
            .map_err(|e| FeedError::CorruptCache {
                reason: format!("cannot read index block: {}", e),
            })?;

        let actual_crc = crc32c::crc32c(&index_json);
        if actual_crc != footer.index_crc32c {
            return Err(FeedError::CorruptCache {
                reason: format!(
                    "index checksum mismatch: expected {}, got {}",
                    footer.index_crc32c, actual_crc
                ),
            });
        }

        let index: CacheIndex =
            serde_json::from_slice(&index_json).map_err(|e| FeedError::CorruptCache {
                reason: format!("index deserialization failed: {}", e),
            })?;
        if index.version != footer.version {
            return Err(FeedError::CorruptCache {
                reason: format!(
                    "index version {} disagrees with footer version {}",
                    index.version, footer.version
                ),
            });
        }
        // The writer refuses to create a cache without specs; an index
        // declaring none cannot describe any entry.
        if index.array_specs.is_empty() {
            return Err(FeedError::CorruptCache {
                reason: "index declares no array specs".into(),
            });
        }

        for (pos, entry) in index.entries.iter().enumerate() {
            if entry.id != pos as u64 {
                return Err(FeedError::CorruptCache {
                    reason: format!("entry {} carries id {}", pos, entry.id),
                });
            }
            let end = entry.offset.checked_add(entry.byte_len);
            if end.is_none() || end.unwrap() > footer.index_offset {
                return Err(FeedError::CorruptCache {
                    reason: format!(
                        "entry {} range {}+{} reaches past the data region",
                        entry.id, entry.offset, entry.byte_len
                    ),
                });
            }
            if entry.shapes.len() != index.array_specs.len() {
                return Err(FeedError::CorruptCache {
                    reason: format!(
                        "entry {} records {} shapes for {} arrays",
                        entry.id,
                        entry.shapes.len(),
                        index.array_specs.len()
                    ),
                });
            }
        }

        debug!(
            "Cache opened: {} sequences, version {}, {}",
            index.entries.len(),
            index.version,
            path.display()
        );
        Ok(Self {
            path,
            file: Mutex::new(file),
            index,
            data_len: footer.index_offset,
        })
    }

    /// Number of cached sequences
    pub fn len(&self) -> u64 {
        self.index.entries.len() as u64
    }

    /// True if the cache holds no sequences
    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    /// Declared array specs
    pub fn array_specs(&self) -> &[ArraySpec] {
        &self.index.array_specs
    }

    /// Cache file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry(&self, id: u64) -> Result<&format::CacheEntry> {
        self.index
            .entries
            .get(id as usize)
            .ok_or_else(|| FeedError::DataUnavailable {
                seq_id: id,
                reason: format!("cache holds {} sequences", self.index.entries.len()),
            })
    }

    /// Time-axis length of the primary array, from the index alone.
    pub fn sequence_length(&self, id: u64) -> Result<usize> {
        let entry = self.entry(id)?;
        Ok(entry.shapes[0].first().copied().unwrap_or(0) as usize)
    }

    /// Diagnostic tag recorded at write time
    pub fn tag(&self, id: u64) -> Result<Option<&str>> {
        Ok(self.entry(id)?.tag.as_deref())
    }

    /// Read and decode one sequence by id.
    pub fn read_sequence(&self, id: u64) -> Result<Sequence> {
        let entry = self.entry(id)?.clone();

        let mut raw = vec![0u8; entry.byte_len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))
                .and_then(|_| file.read_exact(&mut raw))
                .map_err(|e| FeedError::CorruptCache {
                    reason: format!("short read for sequence {}: {}", id, e),
                })?;
        }

        let actual_crc = crc32c::crc32c(&raw);
        if actual_crc != entry.crc32c {
            return Err(FeedError::CorruptCache {
                reason: format!(
                    "payload checksum mismatch for sequence {}: expected {}, got {}",
                    id, entry.crc32c, actual_crc
                ),
            });
        }

        let arrays =
            format::decode_sequence(&self.index.array_specs, &entry.shapes, Bytes::from(raw))?;
        let mut named = HashMap::with_capacity(arrays.len());
        for (spec, array) in self.index.array_specs.iter().zip(arrays) {
            named.insert(spec.key.clone(), array);
        }
        Ok(Sequence::new(id, entry.tag, named))
    }

    /// Total data-region bytes (diagnostics)
    pub fn data_bytes(&self) -> u64 {
        self.data_len
    }
}

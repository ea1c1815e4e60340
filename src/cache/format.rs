//! Cache file format primitives
//!
//! File layout:
//! - per sequence, in write order: one block per declared array,
//!   `[rank u32 LE][dims u64 LE ...][raw LE payload]`
//! - index block: JSON-serialized `CacheIndex`
//! - footer (28 bytes): `[index_offset u64][index_len u64]
//!   [index_crc32c u32][version u32][magic "SQFC"]`
//!
//! Payload bytes stay binary; metadata is JSON like everything else the
//! crate serializes. The footer lets a reader locate the index without
//! scanning, regardless of file size.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::corpus::sequence::{ArraySpec, NdArray};
use crate::error::{FeedError, Result};
use crate::CACHE_FORMAT_VERSION;

/// Magic marker at the very end of the file
pub const CACHE_MAGIC: [u8; 4] = *b"SQFC";

/// Fixed footer size in bytes
pub const FOOTER_LEN: usize = 28;

/// Per-sequence index entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Sequence id (equals the entry's position in the index)
    pub id: u64,
    /// Byte offset of the sequence's first array block
    pub offset: u64,
    /// Total byte length of all array blocks for this sequence
    pub byte_len: u64,
    /// CRC32C over the sequence's blocks
    pub crc32c: u32,
    /// Optional diagnostic tag
    pub tag: Option<String>,
    /// Full shape per declared array, in spec order
    pub shapes: Vec<Vec<u64>>,
}

/// In-memory index, persisted as the trailing JSON block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Format version, must match the footer
    pub version: u32,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Declared array specs, defining block order within a sequence
    pub array_specs: Vec<ArraySpec>,
    /// One entry per sequence, ordered by id
    pub entries: Vec<CacheEntry>,
}

impl CacheIndex {
    /// Create an empty index for the given specs
    pub fn new(array_specs: Vec<ArraySpec>) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            created_at: Utc::now(),
            array_specs,
            entries: Vec::new(),
        }
    }
}

/// Decoded footer fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_len: u64,
    pub index_crc32c: u32,
    pub version: u32,
}

/// Encode the fixed-size footer.
pub fn encode_footer(footer: &Footer) -> [u8; FOOTER_LEN] {
    let mut buf = [0u8; FOOTER_LEN];
    buf[0..8].copy_from_slice(&footer.index_offset.to_le_bytes());
    buf[8..16].copy_from_slice(&footer.index_len.to_le_bytes());
    buf[16..20].copy_from_slice(&footer.index_crc32c.to_le_bytes());
    buf[20..24].copy_from_slice(&footer.version.to_le_bytes());
    buf[24..28].copy_from_slice(&CACHE_MAGIC);
    buf
}

/// Decode and validate a footer read from the file tail.
pub fn decode_footer(raw: &[u8]) -> Result<Footer> {
    if raw.len() != FOOTER_LEN {
        return Err(FeedError::CorruptCache {
            reason: format!("footer is {} bytes, expected {}", raw.len(), FOOTER_LEN),
        });
    }
    if raw[24..28] != CACHE_MAGIC {
        return Err(FeedError::CorruptCache {
            reason: "missing magic marker (file truncated or not a cache)".into(),
        });
    }
    let version = u32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]);
    if version != CACHE_FORMAT_VERSION {
        return Err(FeedError::CorruptCache {
            reason: format!(
                "unsupported format version {} (reader supports {})",
                version, CACHE_FORMAT_VERSION
            ),
        });
    }
    Ok(Footer {
        index_offset: u64::from_le_bytes(raw[0..8].try_into().expect("slice len")),
        index_len: u64::from_le_bytes(raw[8..16].try_into().expect("slice len")),
        index_crc32c: u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]),
        version,
    })
}

/// Serialize one sequence's arrays into a contiguous block run,
/// returning the encoded bytes and the per-array shapes.
pub fn encode_sequence(specs: &[ArraySpec], arrays: &[&NdArray]) -> (Bytes, Vec<Vec<u64>>) {
    debug_assert_eq!(specs.len(), arrays.len());
    let total: usize = arrays
        .iter()
        .map(|a| 4 + 8 * a.shape().len() + a.byte_len())
        .sum();
    let mut buf = BytesMut::with_capacity(total);
    let mut shapes = Vec::with_capacity(arrays.len());

    for array in arrays {
        buf.put_u32_le(array.shape().len() as u32);
        for &dim in array.shape() {
            buf.put_u64_le(dim as u64);
        }
        buf.put(array.data());
        shapes.push(array.shape().iter().map(|&d| d as u64).collect());
    }
    (buf.freeze(), shapes)
}

/// Decode one sequence's block run against the recorded shapes.
pub fn decode_sequence(
    specs: &[ArraySpec],
    shapes: &[Vec<u64>],
    mut raw: Bytes,
) -> Result<Vec<NdArray>> {
    let mut arrays = Vec::with_capacity(specs.len());

    for (spec, recorded) in specs.iter().zip(shapes) {
        if raw.remaining() < 4 {
            return Err(FeedError::CorruptCache {
                reason: format!("short read in header of array '{}'", spec.key),
            });
        }
        let rank = raw.get_u32_le() as usize;
        if rank != recorded.len() || raw.remaining() < 8 * rank {
            return Err(FeedError::CorruptCache {
                reason: format!(
                    "array '{}' header rank {} disagrees with index rank {}",
                    spec.key,
                    rank,
                    recorded.len()
                ),
            });
        }
        let mut shape = Vec::with_capacity(rank);
        for &dim in recorded {
            let stored = raw.get_u64_le();
            if stored != dim {
                return Err(FeedError::CorruptCache {
                    reason: format!(
                        "array '{}' dim {} disagrees with index dim {}",
                        spec.key, stored, dim
                    ),
                });
            }
            shape.push(dim as usize);
        }
        let byte_len = shape.iter().product::<usize>() * spec.dtype.byte_size();
        if raw.remaining() < byte_len {
            return Err(FeedError::CorruptCache {
                reason: format!(
                    "short read in payload of array '{}': {} of {} bytes",
                    spec.key,
                    raw.remaining(),
                    byte_len
                ),
            });
        }
        let payload = raw.split_to(byte_len);
        let array =
            NdArray::from_bytes(spec.dtype, shape, payload).map_err(|e| FeedError::CorruptCache {
                reason: format!("array '{}': {}", spec.key, e),
            })?;
        arrays.push(array);
    }

    if raw.has_remaining() {
        return Err(FeedError::CorruptCache {
            reason: format!("{} trailing bytes after last array", raw.remaining()),
        });
    }
    Ok(arrays)
}

//! Binary sequence cache
//!
//! Append-once, randomly-readable store of sequences and their arrays.
//! Layout: data blocks in write order, then a JSON index block, then a
//! fixed-size footer locating the index. A file without a valid footer
//! (crash before finalize) is rejected at open time.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{CacheEntry, CacheIndex};
pub use reader::CacheReader;
pub use writer::CacheWriter;

//! Sequence data model
//!
//! Dense numeric arrays with a leading variable-length time axis,
//! zero-copy payloads and declared per-corpus array specs.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// Element type of an array payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    F32,
    I32,
}

impl DType {
    /// Size of one element in bytes
    pub fn byte_size(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::I32 => 4,
        }
    }
}

/// Declared spec for one named array of a corpus
///
/// The full shape of a conforming array is `[time] + trailing_shape`,
/// where the time axis is variable per sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    /// Data key, e.g. "features" or "labels"
    pub key: String,
    /// Element type
    pub dtype: DType,
    /// Fixed per-timestep shape (empty for scalar-per-step arrays)
    pub trailing_shape: Vec<usize>,
}

impl ArraySpec {
    /// Create a new spec
    pub fn new(key: impl Into<String>, dtype: DType, trailing_shape: Vec<usize>) -> Self {
        Self {
            key: key.into(),
            dtype,
            trailing_shape,
        }
    }

    /// Full declared rank including the time axis
    pub fn rank(&self) -> usize {
        1 + self.trailing_shape.len()
    }

    /// Check a materialized array against this spec.
    pub fn check(&self, array: &NdArray) -> Result<()> {
        if array.dtype() != self.dtype || array.shape().len() != self.rank()
            || array.shape()[1..] != self.trailing_shape[..]
        {
            return Err(FeedError::ShapeMismatch {
                key: self.key.clone(),
                expected: format!("{:?} [time]+{:?}", self.dtype, self.trailing_shape),
                actual: format!("{:?} {:?}", array.dtype(), array.shape()),
            });
        }
        Ok(())
    }
}

/// Dense numeric array with little-endian packed payload
///
/// The payload is a `Bytes` handle, so time-axis slicing and batch
/// assembly never copy sequence data.
#[derive(Debug, Clone)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    /// Build from raw little-endian bytes, validating the byte length.
    pub fn from_bytes(dtype: DType, shape: Vec<usize>, data: Bytes) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * dtype.byte_size();
        if data.len() != expected {
            return Err(FeedError::Internal {
                message: format!(
                    "array payload is {} bytes, shape {:?} needs {}",
                    data.len(),
                    shape,
                    expected
                ),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build an f32 array from values in row-major order.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for v in values {
            buf.put_f32_le(*v);
        }
        Self::from_bytes(DType::F32, shape, buf.freeze())
    }

    /// Build an i32 array from values in row-major order.
    pub fn from_i32(shape: Vec<usize>, values: &[i32]) -> Result<Self> {
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for v in values {
            buf.put_i32_le(*v);
        }
        Self::from_bytes(DType::I32, shape, buf.freeze())
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Full shape, time axis first
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Length of the time axis
    pub fn time_len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Total element count
    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Payload length in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Bytes per timestep (product of trailing dims times element size)
    pub fn row_bytes(&self) -> usize {
        self.shape[1..].iter().product::<usize>() * self.dtype.byte_size()
    }

    /// Raw little-endian payload (zero-copy handle)
    pub fn data(&self) -> Bytes {
        self.data.clone()
    }

    /// Zero-copy slice along the time axis, end exclusive.
    pub fn slice_time(&self, start: usize, end: usize) -> Result<NdArray> {
        if start > end || end > self.time_len() {
            return Err(FeedError::Internal {
                message: format!(
                    "time slice {}..{} out of bounds for length {}",
                    start,
                    end,
                    self.time_len()
                ),
            });
        }
        let row = self.row_bytes();
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Ok(NdArray {
            dtype: self.dtype,
            shape,
            data: self.data.slice(start * row..end * row),
        })
    }

    /// Decode the payload as f32 values (row-major).
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        if self.dtype != DType::F32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Decode the payload as i32 values (row-major).
    pub fn to_i32_vec(&self) -> Option<Vec<i32>> {
        if self.dtype != DType::I32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

/// One labeled variable-length sequence, immutable once materialized
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Monotonic id within the epoch
    pub id: u64,
    /// Optional diagnostic tag (filename, utterance id, ...)
    pub tag: Option<String>,
    /// Named data arrays
    pub arrays: HashMap<String, NdArray>,
}

impl Sequence {
    /// Create a sequence from its arrays
    pub fn new(id: u64, tag: Option<String>, arrays: HashMap<String, NdArray>) -> Self {
        Self { id, tag, arrays }
    }

    /// Look up an array by key
    pub fn array(&self, key: &str) -> Option<&NdArray> {
        self.arrays.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_time_zero_copy() {
        let arr = NdArray::from_f32(vec![4, 2], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap();
        let win = arr.slice_time(1, 3).unwrap();
        assert_eq!(win.shape(), &[2, 2]);
        assert_eq!(win.to_f32_vec().unwrap(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_slice_time_bounds() {
        let arr = NdArray::from_i32(vec![3], &[1, 2, 3]).unwrap();
        assert!(arr.slice_time(2, 4).is_err());
        assert!(arr.slice_time(0, 3).is_ok());
    }

    #[test]
    fn test_spec_check() {
        let spec = ArraySpec::new("features", DType::F32, vec![2]);
        let good = NdArray::from_f32(vec![5, 2], &[0.0; 10]).unwrap();
        spec.check(&good).unwrap();

        let bad_rank = NdArray::from_f32(vec![10], &[0.0; 10]).unwrap();
        assert!(matches!(
            spec.check(&bad_rank),
            Err(FeedError::ShapeMismatch { .. })
        ));

        let bad_dtype = NdArray::from_i32(vec![5, 2], &[0; 10]).unwrap();
        assert!(spec.check(&bad_dtype).is_err());
    }

    #[test]
    fn test_payload_length_validated() {
        assert!(NdArray::from_bytes(DType::F32, vec![3], Bytes::from_static(&[0u8; 8])).is_err());
    }
}

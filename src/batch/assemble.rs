//! Batch assembly
//!
//! Loads the sequences of one planned batch, applies chunk windows,
//! pads every named array to the batch maximum on the time axis and
//! stacks them into `[n, max_time, ...]` arrays with a validity mask.

use std::collections::HashMap;

use bytes::BytesMut;

use super::bucketer::{PlanItem, PlannedBatch};
use crate::corpus::sequence::{ArraySpec, NdArray};
use crate::corpus::SequenceCorpus;
use crate::error::{FeedError, Result};

/// Validity mask over the primary array's padded time axis
#[derive(Debug, Clone)]
pub struct PaddingMask {
    num_seqs: usize,
    max_time: usize,
    bits: Vec<bool>,
}

impl PaddingMask {
    fn from_lengths(lengths: &[usize], max_time: usize) -> Self {
        let mut bits = vec![false; lengths.len() * max_time];
        for (s, &len) in lengths.iter().enumerate() {
            bits[s * max_time..s * max_time + len].fill(true);
        }
        Self {
            num_seqs: lengths.len(),
            max_time,
            bits,
        }
    }

    /// Mask dimensions (num_seqs, max_time)
    pub fn dims(&self) -> (usize, usize) {
        (self.num_seqs, self.max_time)
    }

    /// True at real positions, false at padding
    pub fn is_valid(&self, seq: usize, t: usize) -> bool {
        self.bits[seq * self.max_time + t]
    }

    /// Count of real (unpadded) positions
    pub fn valid_count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }
}

/// A delivered minibatch: padded stacks plus per-sequence metadata
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position in the epoch's global delivery order
    pub index: usize,
    /// Plan items in batch order (parent id, window offset, length)
    pub items: Vec<PlanItem>,
    /// Diagnostic tags in batch order
    pub tags: Vec<Option<String>>,
    /// Stacked arrays, shape `[n, max_time, ...trailing]` per key
    pub arrays: HashMap<String, NdArray>,
    /// Unpadded time lengths per key, in batch order
    pub lengths: HashMap<String, Vec<usize>>,
    /// Validity mask over the primary key's time axis
    pub mask: PaddingMask,
}

impl Batch {
    /// Number of sequences (or windows) in the batch
    pub fn num_seqs(&self) -> usize {
        self.items.len()
    }

    /// Parent sequence ids in batch order
    pub fn seq_ids(&self) -> Vec<u64> {
        self.items.iter().map(|i| i.seq_id).collect()
    }

    /// Padded elements of the primary key's stack (n * max_time)
    pub fn padded_elems(&self) -> usize {
        let (n, t) = self.mask.dims();
        n * t
    }
}

/// Load and assemble one planned batch from a corpus.
///
/// All arrays within the batch for a given key share identical shape
/// except the padded time axis. Padding positions are zero.
pub fn assemble_batch(
    planned: &PlannedBatch,
    specs: &[ArraySpec],
    corpus: &dyn SequenceCorpus,
) -> Result<Batch> {
    assemble_batch_cancellable(planned, specs, corpus, || false)
        .map(|b| b.expect("never cancelled"))
}

/// Like `assemble_batch`, but checks `cancelled` between sequence
/// loads (never mid-array) and returns `Ok(None)` once it fires.
pub fn assemble_batch_cancellable(
    planned: &PlannedBatch,
    specs: &[ArraySpec],
    corpus: &dyn SequenceCorpus,
    cancelled: impl Fn() -> bool,
) -> Result<Option<Batch>> {
    let n = planned.items.len();
    let mut tags: Vec<Option<String>> = Vec::with_capacity(n);
    // windows[key] holds the (possibly sliced) per-item arrays
    let mut windows: HashMap<&str, Vec<NdArray>> = specs
        .iter()
        .map(|s| (s.key.as_str(), Vec::with_capacity(n)))
        .collect();

    for item in &planned.items {
        if cancelled() {
            return Ok(None);
        }
        let sequence = corpus.load_sequence(item.seq_id)?;
        tags.push(sequence.tag.clone());

        for spec in specs {
            let array = sequence
                .array(&spec.key)
                .ok_or_else(|| FeedError::ShapeMismatch {
                    key: spec.key.clone(),
                    expected: "array present".into(),
                    actual: "missing".into(),
                })?;
            spec.check(array)?;

            // Clip the window per key: secondary keys may be shorter
            // than the primary key that defined the plan item.
            let start = item.offset.min(array.time_len());
            let end = (item.offset + item.len).min(array.time_len());
            let window = array.slice_time(start, end)?;
            windows
                .get_mut(spec.key.as_str())
                .expect("key preallocated")
                .push(window);
        }
    }

    let mut arrays = HashMap::with_capacity(specs.len());
    let mut lengths = HashMap::with_capacity(specs.len());
    for spec in specs {
        let per_item = &windows[spec.key.as_str()];
        let key_lengths: Vec<usize> = per_item.iter().map(NdArray::time_len).collect();
        let max_time = key_lengths.iter().copied().max().unwrap_or(0);

        let row = spec.trailing_shape.iter().product::<usize>() * spec.dtype.byte_size();
        let mut buf = BytesMut::zeroed(n * max_time * row);
        for (i, window) in per_item.iter().enumerate() {
            let dst = i * max_time * row;
            buf[dst..dst + window.byte_len()].copy_from_slice(&window.data());
        }

        let mut shape = vec![n, max_time];
        shape.extend_from_slice(&spec.trailing_shape);
        arrays.insert(
            spec.key.clone(),
            NdArray::from_bytes(spec.dtype, shape, buf.freeze())?,
        );
        lengths.insert(spec.key.clone(), key_lengths);
    }

    let primary_lengths = specs
        .first()
        .and_then(|s| lengths.get(&s.key))
        .cloned()
        .unwrap_or_default();
    let primary_max = primary_lengths.iter().copied().max().unwrap_or(0);
    let mask = PaddingMask::from_lengths(&primary_lengths, primary_max);

    Ok(Some(Batch {
        index: planned.index,
        items: planned.items.clone(),
        tags,
        arrays,
        lengths,
        mask,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::synthetic::{SyntheticCorpus, SyntheticSpec};

    fn test_corpus() -> SyntheticCorpus {
        SyntheticCorpus::open(SyntheticSpec {
            num_sequences: 10,
            feature_dim: 3,
            min_len: 2,
            max_len: 9,
            ..Default::default()
        })
        .unwrap()
    }

    fn planned(items: Vec<PlanItem>) -> PlannedBatch {
        PlannedBatch { index: 0, items }
    }

    #[test]
    fn test_padded_shapes_and_mask() {
        let corpus = test_corpus();
        let specs = corpus.array_specs().to_vec();
        let items: Vec<PlanItem> = (0..4)
            .map(|id| PlanItem {
                seq_id: id,
                offset: 0,
                len: corpus.sequence_length(id).unwrap(),
            })
            .collect();
        let max_len = items.iter().map(|i| i.len).max().unwrap();

        let batch = assemble_batch(&planned(items.clone()), &specs, &corpus).unwrap();

        let features = &batch.arrays["features"];
        assert_eq!(features.shape(), &[4, max_len, 3]);
        let labels = &batch.arrays["labels"];
        assert_eq!(labels.shape(), &[4, max_len]);

        for (s, item) in items.iter().enumerate() {
            for t in 0..max_len {
                assert_eq!(batch.mask.is_valid(s, t), t < item.len);
            }
        }
        assert_eq!(
            batch.mask.valid_count(),
            items.iter().map(|i| i.len).sum::<usize>()
        );
    }

    #[test]
    fn test_padding_is_zero() {
        let corpus = test_corpus();
        let specs = corpus.array_specs().to_vec();
        let lens: Vec<usize> = (0..3)
            .map(|id| corpus.sequence_length(id).unwrap())
            .collect();
        let items: Vec<PlanItem> = lens
            .iter()
            .enumerate()
            .map(|(id, &len)| PlanItem {
                seq_id: id as u64,
                offset: 0,
                len,
            })
            .collect();

        let batch = assemble_batch(&planned(items), &specs, &corpus).unwrap();
        let labels = batch.arrays["labels"].to_i32_vec().unwrap();
        let max_len = *lens.iter().max().unwrap();
        for (s, &len) in lens.iter().enumerate() {
            for t in len..max_len {
                assert_eq!(labels[s * max_len + t], 0, "padding must be zero");
            }
        }
    }

    #[test]
    fn test_window_slicing() {
        let corpus = test_corpus();
        let specs = corpus.array_specs().to_vec();
        let full_len = corpus.sequence_length(1).unwrap();
        assert!(full_len >= 2);

        let batch = assemble_batch(
            &planned(vec![PlanItem {
                seq_id: 1,
                offset: 1,
                len: full_len - 1,
            }]),
            &specs,
            &corpus,
        )
        .unwrap();

        let window = batch.arrays["labels"].to_i32_vec().unwrap();
        let full = corpus
            .load_sequence(1)
            .unwrap()
            .array("labels")
            .unwrap()
            .to_i32_vec()
            .unwrap();
        assert_eq!(window, full[1..].to_vec());
    }
}

//! Length bucketing and batch planning
//!
//! Pure algorithm: given (sequence id, length) metadata and batching
//! constraints, produce the epoch's grouping of ids into batches. The
//! grouping is deterministic given the same metadata, seed and
//! configuration; under exact sort, ties between equal lengths break
//! by ascending sequence id, then window offset.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FeedError, Result};

/// How sequences are ordered before greedy packing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LengthOrdering {
    /// Keep epoch order; batches mix lengths freely
    InOrder,
    /// Exact sort by length (ascending), minimizing padding
    SortByLength,
    /// Approximate bucket-sort: assign each sequence to one of
    /// `num_buckets` length bands, keep epoch order within a band.
    /// Bounds sort cost on very large corpora.
    QuantileBuckets { num_buckets: usize },
}

impl Default for LengthOrdering {
    fn default() -> Self {
        LengthOrdering::SortByLength
    }
}

/// Fixed-size windowing of long sequences for truncated training
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunking {
    /// Window length in timesteps
    pub size: usize,
    /// Stride between window starts; `step < size` overlaps windows
    pub step: usize,
}

/// Batching constraints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Budget per batch in padded elements: n_sequences * max_length
    pub max_padded_elems: usize,
    /// Optional cap on sequences per batch
    #[serde(default)]
    pub max_seqs: Option<usize>,
    /// Optional cap on `max_len - min_len` within a batch; bounds the
    /// padding a short sequence can pick up from a long neighbor
    #[serde(default)]
    pub max_length_gap: Option<usize>,
    /// Pre-packing ordering
    #[serde(default)]
    pub ordering: LengthOrdering,
    /// Optional chunked windowing of long sequences
    #[serde(default)]
    pub chunking: Option<Chunking>,
    /// Shuffle sequence order inside each batch (grouping unchanged)
    #[serde(default)]
    pub shuffle_within_batch: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_padded_elems: 4000,
            max_seqs: None,
            max_length_gap: None,
            ordering: LengthOrdering::default(),
            chunking: None,
            shuffle_within_batch: false,
        }
    }
}

impl BucketConfig {
    /// Validate the constraints.
    pub fn validate(&self) -> Result<()> {
        if self.max_padded_elems == 0 {
            return Err(FeedError::Config {
                message: "max_padded_elems must be positive".into(),
            });
        }
        if self.max_seqs == Some(0) {
            return Err(FeedError::Config {
                message: "max_seqs must be positive when set".into(),
            });
        }
        if let Some(c) = self.chunking {
            if c.size == 0 || c.step == 0 || c.step > c.size {
                return Err(FeedError::Config {
                    message: format!(
                        "chunking needs 0 < step <= size, got size={} step={}",
                        c.size, c.step
                    ),
                });
            }
        }
        Ok(())
    }
}

/// One schedulable unit: a whole sequence, or a window into one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanItem {
    /// Parent sequence id (back-reference for reassembly)
    pub seq_id: u64,
    /// Window start on the time axis (0 for unchunked sequences)
    pub offset: usize,
    /// Window length
    pub len: usize,
}

/// A planned batch: ordered items sharing one padded stack
#[derive(Debug, Clone)]
pub struct PlannedBatch {
    /// Position in global delivery order
    pub index: usize,
    /// Items in batch order
    pub items: Vec<PlanItem>,
}

impl PlannedBatch {
    /// Longest item in the batch (the padded time length)
    pub fn max_len(&self) -> usize {
        self.items.iter().map(|i| i.len).max().unwrap_or(0)
    }

    /// Padded element count: n_items * max_len
    pub fn padded_elems(&self) -> usize {
        self.items.len() * self.max_len()
    }
}

/// The materialized grouping for one epoch, immutable once computed
#[derive(Debug, Clone)]
pub struct BucketingPlan {
    /// Epoch this plan belongs to
    pub epoch: u64,
    /// Batches in delivery order
    pub batches: Vec<PlannedBatch>,
    /// Indices of batches whose single item alone exceeds the budget
    pub oversized: Vec<usize>,
}

impl BucketingPlan {
    /// Number of planned batches
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// True for an empty epoch
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total items across all batches
    pub fn total_items(&self) -> usize {
        self.batches.iter().map(|b| b.items.len()).sum()
    }
}

/// Plans batches from length metadata
pub struct BucketPlanner {
    config: BucketConfig,
}

impl BucketPlanner {
    /// Create a planner for the given constraints (assumed validated).
    pub fn new(config: BucketConfig) -> Self {
        Self { config }
    }

    /// Compute the plan for one epoch.
    ///
    /// `entries` is the epoch's (sequence id, length) list in epoch
    /// order. `seed` only affects within-batch shuffling; the grouping
    /// itself is a pure function of entries and configuration.
    pub fn plan(&self, entries: &[(u64, usize)], epoch: u64, seed: u64) -> BucketingPlan {
        let mut items = self.split_items(entries);
        self.order_items(&mut items);

        let max_seqs = self.config.max_seqs.unwrap_or(usize::MAX);
        let budget = self.config.max_padded_elems;

        let mut batches: Vec<PlannedBatch> = Vec::new();
        let mut oversized: Vec<usize> = Vec::new();
        let mut current: Vec<PlanItem> = Vec::new();
        let mut current_max = 0usize;

        let mut close =
            |current: &mut Vec<PlanItem>, current_max: &mut usize, batches: &mut Vec<PlannedBatch>, oversized: &mut Vec<usize>| {
                if current.is_empty() {
                    return;
                }
                let index = batches.len();
                let batch = PlannedBatch {
                    index,
                    items: std::mem::take(current),
                };
                if batch.padded_elems() > budget {
                    warn!(
                        "Batch {} exceeds budget: {} padded elements > {} (singleton sequence)",
                        index,
                        batch.padded_elems(),
                        budget
                    );
                    oversized.push(index);
                }
                batches.push(batch);
                *current_max = 0;
            };

        for item in items {
            let would_be_max = current_max.max(item.len);
            let would_be_elems = (current.len() + 1) * would_be_max;
            let gap_exceeded = match self.config.max_length_gap {
                Some(gap) if !current.is_empty() => {
                    let would_be_min = current
                        .iter()
                        .map(|i| i.len)
                        .min()
                        .unwrap_or(item.len)
                        .min(item.len);
                    would_be_max - would_be_min > gap
                }
                _ => false,
            };
            if !current.is_empty()
                && (would_be_elems > budget || current.len() >= max_seqs || gap_exceeded)
            {
                close(&mut current, &mut current_max, &mut batches, &mut oversized);
            }
            current_max = current_max.max(item.len);
            current.push(item);
        }
        close(&mut current, &mut current_max, &mut batches, &mut oversized);

        if self.config.shuffle_within_batch {
            for batch in &mut batches {
                let mut rng = StdRng::seed_from_u64(
                    seed.wrapping_add(epoch.wrapping_mul(0x51_7C_C1_B7))
                        .wrapping_add(batch.index as u64),
                );
                batch.items.shuffle(&mut rng);
            }
        }

        debug!(
            "Planned epoch {}: {} batches, {} items, {} oversized",
            epoch,
            batches.len(),
            batches.iter().map(|b| b.items.len()).sum::<usize>(),
            oversized.len()
        );
        BucketingPlan {
            epoch,
            batches,
            oversized,
        }
    }

    /// Apply chunked windowing; without chunking every sequence is one
    /// item. A zero-length sequence still yields one item so epoch
    /// coverage stays exact.
    fn split_items(&self, entries: &[(u64, usize)]) -> Vec<PlanItem> {
        let Some(chunking) = self.config.chunking else {
            return entries
                .iter()
                .map(|&(seq_id, len)| PlanItem {
                    seq_id,
                    offset: 0,
                    len,
                })
                .collect();
        };

        let mut items = Vec::with_capacity(entries.len());
        for &(seq_id, len) in entries {
            if len == 0 {
                items.push(PlanItem {
                    seq_id,
                    offset: 0,
                    len: 0,
                });
                continue;
            }
            let mut offset = 0;
            while offset < len {
                items.push(PlanItem {
                    seq_id,
                    offset,
                    len: chunking.size.min(len - offset),
                });
                offset += chunking.step;
            }
        }
        items
    }

    fn order_items(&self, items: &mut [PlanItem]) {
        match self.config.ordering {
            LengthOrdering::InOrder => {}
            LengthOrdering::SortByLength => {
                items.sort_by_key(|i| (i.len, i.seq_id, i.offset));
            }
            LengthOrdering::QuantileBuckets { num_buckets } => {
                let min = items.iter().map(|i| i.len).min().unwrap_or(0);
                let max = items.iter().map(|i| i.len).max().unwrap_or(0);
                let span = (max - min).max(1);
                let band = move |len: usize| (len - min) * num_buckets.max(1) / (span + 1);
                // Stable sort, so epoch order survives within a band
                items.sort_by_key(|i| band(i.len));
            }
        }
    }
}

//! Procedurally generated corpus
//!
//! Every sequence is a pure function of (seed, id), so lengths are
//! derivable without materializing arrays and repeated epochs see
//! identical data. Useful as a cacheable stand-in for expensive
//! feature extraction and as the test corpus.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::sequence::{ArraySpec, DType, NdArray, Sequence};
use super::SequenceCorpus;
use crate::error::{FeedError, Result};

/// Configuration for the synthetic corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticSpec {
    /// Number of sequences per epoch
    pub num_sequences: u64,
    /// Feature dimension per timestep
    pub feature_dim: usize,
    /// Label alphabet size
    pub num_classes: i32,
    /// Minimum time-axis length (inclusive)
    pub min_len: usize,
    /// Maximum time-axis length (inclusive)
    pub max_len: usize,
    /// Generation seed
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            num_sequences: 100,
            feature_dim: 4,
            num_classes: 10,
            min_len: 2,
            max_len: 20,
            seed: 1,
        }
    }
}

impl SyntheticSpec {
    /// Validate the generation parameters.
    pub fn validate(&self) -> Result<()> {
        if self.min_len == 0 || self.max_len < self.min_len {
            return Err(FeedError::Config {
                message: format!(
                    "invalid length range [{}, {}]",
                    self.min_len, self.max_len
                ),
            });
        }
        if self.feature_dim == 0 || self.num_classes <= 0 {
            return Err(FeedError::Config {
                message: "feature_dim and num_classes must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Generated corpus of (features, labels) sequences
pub struct SyntheticCorpus {
    spec: SyntheticSpec,
    array_specs: Vec<ArraySpec>,
}

impl SyntheticCorpus {
    /// Open a synthetic corpus from its spec.
    pub fn open(spec: SyntheticSpec) -> Result<Self> {
        spec.validate()?;
        let array_specs = vec![
            ArraySpec::new("features", DType::F32, vec![spec.feature_dim]),
            ArraySpec::new("labels", DType::I32, vec![]),
        ];
        Ok(Self { spec, array_specs })
    }

    /// Per-sequence RNG. The length is always the first sample drawn,
    /// so `sequence_length` stays cheap.
    fn seq_rng(&self, id: u64) -> StdRng {
        StdRng::seed_from_u64(
            self.spec
                .seed
                .wrapping_add(id.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        )
    }

    fn draw_length(&self, rng: &mut StdRng) -> usize {
        rng.gen_range(self.spec.min_len..=self.spec.max_len)
    }

    fn check_id(&self, id: u64) -> Result<()> {
        if id >= self.spec.num_sequences {
            return Err(FeedError::DataUnavailable {
                seq_id: id,
                reason: format!("corpus has {} sequences", self.spec.num_sequences),
            });
        }
        Ok(())
    }
}

impl SequenceCorpus for SyntheticCorpus {
    fn array_specs(&self) -> &[ArraySpec] {
        &self.array_specs
    }

    fn init_epoch(&mut self, _epoch: u64, _shuffle_seed: u64) -> Result<()> {
        // Generation is a pure function of (seed, id); nothing to refresh.
        Ok(())
    }

    fn num_sequences(&self) -> Option<u64> {
        Some(self.spec.num_sequences)
    }

    fn sequence_length(&self, id: u64) -> Result<usize> {
        self.check_id(id)?;
        let mut rng = self.seq_rng(id);
        Ok(self.draw_length(&mut rng))
    }

    fn load_sequence(&self, id: u64) -> Result<Sequence> {
        self.check_id(id)?;
        let mut rng = self.seq_rng(id);
        let len = self.draw_length(&mut rng);

        let features: Vec<f32> = (0..len * self.spec.feature_dim)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let labels: Vec<i32> = (0..len)
            .map(|_| rng.gen_range(0..self.spec.num_classes))
            .collect();

        let mut arrays = HashMap::new();
        arrays.insert(
            "features".to_string(),
            NdArray::from_f32(vec![len, self.spec.feature_dim], &features)?,
        );
        arrays.insert("labels".to_string(), NdArray::from_i32(vec![len], &labels)?);

        Ok(Sequence::new(id, Some(format!("synthetic-{:06}", id)), arrays))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

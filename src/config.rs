//! Resolved feed configuration
//!
//! The core does not parse configuration files; an external loader hands
//! it this resolved, serde-deserializable mapping. Validation fails fast
//! on missing or contradictory options.

use serde::{Deserialize, Serialize};

use crate::batch::bucketer::{BucketConfig, LengthOrdering};
use crate::corpus::CorpusSpec;
use crate::error::{FeedError, Result};
use crate::pipeline::PipelineConfig;

/// Epoch shuffling policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShufflePolicy {
    /// Keep corpus order
    None,
    /// Seeded permutation, re-derived from (seed, epoch) each epoch
    PerEpoch { seed: u64 },
}

impl Default for ShufflePolicy {
    fn default() -> Self {
        ShufflePolicy::None
    }
}

/// Modulus partition filter over sequence ids
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    /// Total number of partitions
    pub num_parts: u64,
    /// Which partition this instance keeps (0-based)
    pub part_index: u64,
}

/// Top-level resolved configuration for one corpus feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Data source locator
    pub source: CorpusSpec,
    /// Epoch shuffling policy
    #[serde(default)]
    pub shuffle: ShufflePolicy,
    /// Optional partition filter (keep ids where id % num_parts == part_index)
    #[serde(default)]
    pub partition: Option<Partition>,
    /// Optional subsampling fraction in (0, 1]; 1.0 keeps everything
    #[serde(default)]
    pub subsample: Option<f64>,
    /// Batching and chunking options
    pub bucketing: BucketConfig,
    /// Prefetch pipeline options
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Write-through cache path; requires a cacheable source
    #[serde(default)]
    pub cache_path: Option<std::path::PathBuf>,
}

impl FeedConfig {
    /// Validate the resolved options.
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.bucketing.validate()?;
        self.pipeline.validate()?;

        if let Some(p) = &self.partition {
            if p.num_parts == 0 {
                return Err(FeedError::Config {
                    message: "partition.num_parts must be positive".into(),
                });
            }
            if p.part_index >= p.num_parts {
                return Err(FeedError::Config {
                    message: format!(
                        "partition.part_index {} out of range for {} parts",
                        p.part_index, p.num_parts
                    ),
                });
            }
        }

        if let Some(f) = self.subsample {
            if !(f > 0.0 && f <= 1.0) {
                return Err(FeedError::Config {
                    message: format!("subsample fraction {} not in (0, 1]", f),
                });
            }
        }

        if self.cache_path.is_some() && !self.source.is_cacheable() {
            return Err(FeedError::Config {
                message: "cache_path configured but the source is not cacheable".into(),
            });
        }

        if matches!(self.bucketing.ordering, LengthOrdering::QuantileBuckets { num_buckets } if num_buckets == 0)
        {
            return Err(FeedError::Config {
                message: "quantile bucket count must be positive".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::synthetic::SyntheticSpec;

    fn base_config() -> FeedConfig {
        FeedConfig {
            source: CorpusSpec::Synthetic(SyntheticSpec::default()),
            shuffle: ShufflePolicy::PerEpoch { seed: 42 },
            partition: None,
            subsample: None,
            bucketing: BucketConfig {
                max_padded_elems: 100,
                ..Default::default()
            },
            pipeline: PipelineConfig::default(),
            cache_path: None,
        }
    }

    #[test]
    fn test_valid_config() {
        base_config().validate().unwrap();
    }

    #[test]
    fn test_bad_partition() {
        let mut cfg = base_config();
        cfg.partition = Some(Partition {
            num_parts: 4,
            part_index: 4,
        });
        assert!(matches!(
            cfg.validate(),
            Err(FeedError::Config { .. })
        ));
    }

    #[test]
    fn test_bad_subsample() {
        let mut cfg = base_config();
        cfg.subsample = Some(0.0);
        assert!(cfg.validate().is_err());
        cfg.subsample = Some(1.5);
        assert!(cfg.validate().is_err());
        cfg.subsample = Some(0.5);
        assert!(cfg.validate().is_ok());
    }
}

//! Top-level feed facade
//!
//! One object owning the whole feed: source resolution (including the
//! write-through cache), epoch planning and the prefetch pipeline.
//! Consumers drive it with `open` / `init_epoch` / `next` / `close`.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::batch::bucketer::{BucketPlanner, BucketingPlan};
use crate::batch::Batch;
use crate::cache::writer::CacheWriter;
use crate::config::{FeedConfig, ShufflePolicy};
use crate::corpus::sequence::ArraySpec;
use crate::corpus::CorpusSpec;
use crate::error::{FeedError, Result};
use crate::metrics::FeedMetrics;
use crate::pipeline::PrefetchPipeline;

/// Summary of a freshly planned epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochInfo {
    pub epoch: u64,
    /// Batches the epoch will deliver
    pub num_batches: usize,
    /// Items (chunk windows) across all batches
    pub num_items: usize,
    /// Singleton batches exceeding the padding budget
    pub num_oversized: usize,
}

struct EpochState {
    epoch: u64,
    pipeline: PrefetchPipeline,
}

/// Feed facade: owns the resolved source and the per-epoch pipeline
pub struct CorpusFacade {
    config: FeedConfig,
    /// Source after cache resolution; workers open handles from this
    effective_source: CorpusSpec,
    array_specs: Vec<ArraySpec>,
    planner: BucketPlanner,
    metrics: Arc<FeedMetrics>,
    current: Option<EpochState>,
    closed: bool,
}

impl CorpusFacade {
    /// Validate the configuration, resolve the source (materializing
    /// the write-through cache if configured and absent) and probe the
    /// array specs.
    pub fn open(config: FeedConfig) -> Result<Self> {
        config.validate()?;

        let effective_source = match &config.cache_path {
            Some(path) if path.exists() => {
                info!("Reusing existing cache at {}", path.display());
                CorpusSpec::Cache { path: path.clone() }
            }
            Some(path) => {
                materialize_cache(&config.source, path)?;
                CorpusSpec::Cache { path: path.clone() }
            }
            None => config.source.clone(),
        };

        let mut probe = effective_source.open()?;
        let array_specs = probe.array_specs().to_vec();
        probe.close()?;
        if array_specs.is_empty() {
            return Err(FeedError::Config {
                message: "corpus declares no arrays".into(),
            });
        }

        Ok(Self {
            planner: BucketPlanner::new(config.bucketing.clone()),
            config,
            effective_source,
            array_specs,
            metrics: Arc::new(FeedMetrics::new()),
            current: None,
            closed: false,
        })
    }

    /// Plan one epoch and start its prefetch pipeline. Any previous
    /// epoch's pipeline is stopped first.
    pub async fn init_epoch(&mut self, epoch: u64) -> Result<EpochInfo> {
        self.ensure_open()?;
        if let Some(mut state) = self.current.take() {
            state.pipeline.stop().await;
        }

        let seed = self.epoch_seed(epoch);
        let plan = self.plan_epoch(epoch, seed)?;
        let info = EpochInfo {
            epoch,
            num_batches: plan.len(),
            num_items: plan.total_items(),
            num_oversized: plan.oversized.len(),
        };
        self.metrics
            .oversized_batches
            .inc_by(plan.oversized.len() as u64);

        let pipeline = PrefetchPipeline::start(
            plan,
            self.effective_source.clone(),
            self.array_specs.clone(),
            epoch,
            seed,
            &self.config.pipeline,
            self.metrics.clone(),
        );
        self.current = Some(EpochState { epoch, pipeline });
        Ok(info)
    }

    /// Deliver the next batch of the current epoch in plan order, or
    /// `Ok(None)` once the epoch is exhausted.
    pub async fn next(&mut self) -> Result<Option<Batch>> {
        self.ensure_open()?;
        match &mut self.current {
            Some(state) => state.pipeline.next().await,
            None => Err(FeedError::PipelineNotRunning),
        }
    }

    /// Stop the pipeline and release the source. Idempotent; any call
    /// after this fails with `PipelineNotRunning`.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut state) = self.current.take() {
            state.pipeline.stop().await;
        }
        info!("Feed closed");
    }

    /// Declared array specs of the resolved source
    pub fn array_specs(&self) -> &[ArraySpec] {
        &self.array_specs
    }

    /// Epoch currently being delivered, if any
    pub fn current_epoch(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.epoch)
    }

    /// Shared metrics handle
    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(FeedError::PipelineNotRunning);
        }
        Ok(())
    }

    fn epoch_seed(&self, epoch: u64) -> u64 {
        match self.config.shuffle {
            ShufflePolicy::None => 0,
            ShufflePolicy::PerEpoch { seed } => {
                seed.wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
        }
    }

    /// Select this instance's sequence ids for `epoch`, look their
    /// lengths up and hand the list to the planner.
    fn plan_epoch(&self, epoch: u64, seed: u64) -> Result<BucketingPlan> {
        let mut corpus = self.effective_source.open()?;
        corpus.init_epoch(epoch, seed)?;

        let total = corpus.num_sequences().ok_or_else(|| FeedError::Config {
            message: "corpus size unknown in advance; epoch planning needs a finite corpus".into(),
        })?;

        let mut ids: Vec<u64> = match &self.config.partition {
            Some(p) => (0..total).filter(|id| id % p.num_parts == p.part_index).collect(),
            None => (0..total).collect(),
        };

        if matches!(self.config.shuffle, ShufflePolicy::PerEpoch { .. }) {
            let mut rng = StdRng::seed_from_u64(seed);
            ids.shuffle(&mut rng);
        }

        if let Some(fraction) = self.config.subsample {
            let keep = ((ids.len() as f64 * fraction).ceil() as usize).min(ids.len());
            ids.truncate(keep);
        }

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            entries.push((id, corpus.sequence_length(id)?));
        }
        if let Err(e) = corpus.close() {
            warn!("Planning corpus close failed: {}", e);
        }

        Ok(self.planner.plan(&entries, epoch, seed))
    }
}

/// Pull every sequence of `source` through a `CacheWriter` at `path`.
///
/// A partial file from a failed run is removed so the next open can
/// retry cleanly.
fn materialize_cache(source: &CorpusSpec, path: &std::path::Path) -> Result<()> {
    info!("Materializing cache at {}", path.display());
    let result = write_all_sequences(source, path);
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove partial cache {}: {}", path.display(), e);
            }
        }
    }
    result
}

fn write_all_sequences(source: &CorpusSpec, path: &std::path::Path) -> Result<()> {
    let mut corpus = source.open()?;
    corpus.init_epoch(0, 0)?;
    let total = corpus.num_sequences().ok_or_else(|| FeedError::Config {
        message: "cannot cache a corpus of unknown size".into(),
    })?;

    let mut writer = CacheWriter::begin_write(path, corpus.array_specs().to_vec())?;
    for id in 0..total {
        let sequence = corpus.load_sequence(id)?;
        writer.append_sequence(&sequence.arrays, sequence.tag.as_deref())?;
    }
    writer.finalize_write()?;
    corpus.close()?;
    Ok(())
}

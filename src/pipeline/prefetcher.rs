//! Prefetch workers and in-order delivery
//!
//! Worker tasks walk disjoint round-robin shards of the bucketing
//! plan, each with a privately opened corpus handle, and push finished
//! batches onto a bounded channel. The consumer re-orders completions
//! back into the plan's global order before handoff.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::backpressure::{RunAheadLimiter, RunAheadPermit};
use super::shutdown::ShutdownSignal;
use super::PipelineConfig;
use crate::batch::assemble::assemble_batch_cancellable;
use crate::batch::bucketer::BucketingPlan;
use crate::batch::Batch;
use crate::corpus::sequence::ArraySpec;
use crate::corpus::CorpusSpec;
use crate::error::{FeedError, Result};
use crate::metrics::FeedMetrics;

/// How long `stop()` waits for workers before aborting them
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One finished (or failed) batch travelling to the consumer. The
/// permit inside releases the producing worker's run-ahead slot when
/// the envelope is delivered or drained.
struct BatchEnvelope {
    index: usize,
    payload: Result<Batch>,
    _permit: RunAheadPermit,
}

/// Per-epoch prefetching pipeline
///
/// Created via `start()`, consumed via `next()`, torn down via
/// `stop()`. Batches come out in the plan's global order regardless of
/// worker scheduling.
pub struct PrefetchPipeline {
    receiver: mpsc::Receiver<BatchEnvelope>,
    // Out-of-order completions parked until their turn
    reorder: BTreeMap<usize, BatchEnvelope>,
    next_index: usize,
    delivered: usize,
    total_batches: usize,
    shutdown: ShutdownSignal,
    limiter: RunAheadLimiter,
    failure_rx: watch::Receiver<Option<String>>,
    failure_watch_live: bool,
    monitor: Option<JoinHandle<()>>,
    abort_handles: Vec<AbortHandle>,
    metrics: Arc<FeedMetrics>,
    stopped: bool,
    failed: bool,
}

impl PrefetchPipeline {
    /// Spawn workers for one epoch's plan and start producing.
    pub fn start(
        plan: BucketingPlan,
        source: CorpusSpec,
        array_specs: Vec<ArraySpec>,
        epoch: u64,
        shuffle_seed: u64,
        config: &PipelineConfig,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        let total_batches = plan.len();
        let num_workers = config.num_workers.min(total_batches.max(1));
        let plan = Arc::new(plan);

        let (sender, receiver) = mpsc::channel(config.channel_capacity);
        let limiter = RunAheadLimiter::new(num_workers, config.run_ahead);
        let shutdown = ShutdownSignal::new();
        let (failure_tx, failure_rx) = watch::channel(None::<String>);

        info!(
            "Starting prefetch pipeline: epoch {}, {} batches, {} workers, capacity {}",
            epoch, total_batches, num_workers, config.channel_capacity
        );

        let mut handles = Vec::with_capacity(num_workers);
        let mut abort_handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let worker = PrefetchWorker {
                id: worker_id,
                num_workers,
                plan: plan.clone(),
                source: source.clone(),
                specs: array_specs.clone(),
                epoch,
                shuffle_seed,
                sender: sender.clone(),
                limiter: limiter.clone(),
                shutdown: shutdown.clone(),
                metrics: metrics.clone(),
            };
            let handle = tokio::spawn(worker.run());
            abort_handles.push(handle.abort_handle());
            handles.push(handle);
        }
        drop(sender);

        let monitor = tokio::spawn(async move {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_err) = handle.await {
                    if join_err.is_panic() {
                        error!("Prefetch worker {} panicked", worker_id);
                        let _ = failure_tx.send(Some(format!(
                            "worker {} panicked during batch production",
                            worker_id
                        )));
                    }
                }
            }
        });

        Self {
            receiver,
            reorder: BTreeMap::new(),
            next_index: 0,
            delivered: 0,
            total_batches,
            shutdown,
            limiter,
            failure_rx,
            failure_watch_live: true,
            monitor: Some(monitor),
            abort_handles,
            metrics,
            stopped: false,
            failed: false,
        }
    }

    /// Deliver the next batch in global plan order.
    ///
    /// Blocks until the batch is ready, the epoch ends (`Ok(None)`) or
    /// an error is pending. Per-sequence errors are returned for the
    /// batch that owns them; delivery continues on the next call.
    pub async fn next(&mut self) -> Result<Option<Batch>> {
        if self.stopped || self.failed {
            return Err(FeedError::PipelineNotRunning);
        }
        loop {
            if self.delivered == self.total_batches {
                return Ok(None);
            }
            if let Some(envelope) = self.reorder.remove(&self.next_index) {
                return self.deliver(envelope);
            }

            if self.failure_watch_live {
                tokio::select! {
                    maybe = self.receiver.recv() => self.on_recv(maybe)?,
                    res = self.failure_rx.changed() => {
                        if res.is_err() {
                            // Monitor finished without reporting; stop polling it.
                            self.failure_watch_live = false;
                        } else if let Some(reason) = self.failure_rx.borrow_and_update().clone() {
                            self.failed = true;
                            return Err(FeedError::WorkerLost { reason });
                        }
                    }
                }
            } else {
                let maybe = self.receiver.recv().await;
                self.on_recv(maybe)?;
            }
        }
    }

    fn on_recv(&mut self, maybe: Option<BatchEnvelope>) -> Result<()> {
        match maybe {
            Some(envelope) => {
                self.reorder.insert(envelope.index, envelope);
                Ok(())
            }
            None => {
                // All senders gone with batches still owed.
                self.failed = true;
                Err(FeedError::WorkerLost {
                    reason: format!(
                        "delivery channel closed after {} of {} batches",
                        self.delivered, self.total_batches
                    ),
                })
            }
        }
    }

    fn deliver(&mut self, envelope: BatchEnvelope) -> Result<Option<Batch>> {
        debug_assert_eq!(envelope.index, self.next_index);
        self.next_index += 1;
        self.delivered += 1;

        let BatchEnvelope {
            payload, _permit, ..
        } = envelope;
        drop(_permit);
        self.metrics
            .pending_batches
            .set(self.limiter.pending_count() as i64);

        match payload {
            Ok(batch) => {
                self.metrics.batches_delivered.inc();
                self.metrics
                    .padded_elements
                    .inc_by(batch.padded_elems() as u64);
                self.metrics
                    .valid_elements
                    .inc_by(batch.mask.valid_count() as u64);
                Ok(Some(batch))
            }
            Err(e) if e.is_sequence_local() => {
                self.metrics.data_errors.inc();
                Err(e)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Batches delivered so far this epoch
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Total batches in this epoch's plan
    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    /// Signal workers to abandon remaining assignments, drain the
    /// channel and join them. Safe in any state, idempotent.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Stopping prefetch pipeline");

        self.shutdown.shutdown();
        // Closing fails pending pushes; draining releases permits so
        // workers blocked on acquire can observe the signal.
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
        self.reorder.clear();

        if let Some(monitor) = self.monitor.take() {
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, monitor).await.is_err() {
                warn!("Prefetch workers did not stop in time, aborting");
                for handle in &self.abort_handles {
                    handle.abort();
                }
            }
        }
        self.metrics
            .pending_batches
            .set(self.limiter.pending_count() as i64);
        debug!("Prefetch pipeline stopped after {} deliveries", self.delivered);
    }
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        if !self.stopped {
            self.shutdown.shutdown();
            for handle in &self.abort_handles {
                handle.abort();
            }
        }
    }
}

/// One prefetch worker: a round-robin shard of the plan and a private
/// corpus handle
struct PrefetchWorker {
    id: usize,
    num_workers: usize,
    plan: Arc<BucketingPlan>,
    source: CorpusSpec,
    specs: Vec<ArraySpec>,
    epoch: u64,
    shuffle_seed: u64,
    sender: mpsc::Sender<BatchEnvelope>,
    limiter: RunAheadLimiter,
    shutdown: ShutdownSignal,
    metrics: Arc<FeedMetrics>,
}

impl PrefetchWorker {
    async fn run(self) {
        let assigned: Vec<usize> = (self.id..self.plan.batches.len())
            .step_by(self.num_workers)
            .collect();
        debug!("Worker {} starting with {} batches", self.id, assigned.len());

        let mut corpus = match self.open_corpus() {
            Ok(corpus) => corpus,
            Err(e) => {
                error!("Worker {} failed to open corpus: {}", self.id, e);
                // Surface the failure on the first batch this worker owes.
                if let Some(&first) = assigned.first() {
                    let permit = self.limiter.acquire(self.id).await;
                    let _ = self
                        .sender
                        .send(BatchEnvelope {
                            index: first,
                            payload: Err(e),
                            _permit: permit,
                        })
                        .await;
                }
                return;
            }
        };

        let mut shutdown_rx = self.shutdown.subscribe();
        for index in assigned {
            if self.shutdown.is_shutdown() {
                break;
            }
            let permit = tokio::select! {
                permit = self.limiter.acquire(self.id) => permit,
                _ = shutdown_rx.recv() => break,
            };

            let payload = match assemble_batch_cancellable(
                &self.plan.batches[index],
                &self.specs,
                corpus.as_ref(),
                || self.shutdown.is_shutdown(),
            ) {
                Ok(None) => break, // cancelled between sequence loads
                Ok(Some(batch)) => {
                    self.metrics
                        .sequences_loaded
                        .inc_by(batch.num_seqs() as u64);
                    Ok(batch)
                }
                Err(e) => {
                    warn!("Worker {} failed to load batch {}: {}", self.id, index, e);
                    Err(e)
                }
            };

            let envelope = BatchEnvelope {
                index,
                payload,
                _permit: permit,
            };
            tokio::select! {
                res = self.sender.send(envelope) => {
                    if res.is_err() {
                        debug!("Worker {}: consumer gone, stopping", self.id);
                        break;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        if let Err(e) = corpus.close() {
            warn!("Worker {} corpus close failed: {}", self.id, e);
        }
        debug!("Worker {} done", self.id);
    }

    fn open_corpus(&self) -> Result<Box<dyn crate::corpus::SequenceCorpus>> {
        let mut corpus = self.source.open()?;
        corpus.init_epoch(self.epoch, self.shuffle_seed)?;
        Ok(corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::bucketer::{BucketConfig, BucketPlanner};
    use crate::corpus::synthetic::SyntheticSpec;

    fn build(num_sequences: u64, budget: usize) -> (BucketingPlan, CorpusSpec, Vec<ArraySpec>) {
        let source = CorpusSpec::Synthetic(SyntheticSpec {
            num_sequences,
            feature_dim: 2,
            num_classes: 4,
            min_len: 2,
            max_len: 6,
            seed: 3,
        });
        let corpus = source.open().unwrap();
        let specs = corpus.array_specs().to_vec();
        let entries: Vec<(u64, usize)> = (0..num_sequences)
            .map(|id| (id, corpus.sequence_length(id).unwrap()))
            .collect();
        let plan = BucketPlanner::new(BucketConfig {
            max_padded_elems: budget,
            ..Default::default()
        })
        .plan(&entries, 1, 0);
        (plan, source, specs)
    }

    #[tokio::test]
    async fn test_in_order_delivery_under_tight_capacity() {
        let (plan, source, specs) = build(20, 12);
        let total = plan.len();
        assert!(total > 3);

        // Capacity 1 forces every worker to block on push at some point
        let config = PipelineConfig {
            num_workers: 3,
            channel_capacity: 1,
            run_ahead: 1,
        };
        let mut pipeline = PrefetchPipeline::start(
            plan,
            source,
            specs,
            1,
            0,
            &config,
            Arc::new(FeedMetrics::new()),
        );

        let mut indices = Vec::new();
        while let Some(batch) = pipeline.next().await.unwrap() {
            indices.push(batch.index);
        }
        assert_eq!(indices, (0..total).collect::<Vec<_>>());
        assert_eq!(pipeline.delivered(), total);
    }

    #[tokio::test]
    async fn test_stop_mid_production_is_prompt_and_idempotent() {
        let (plan, source, specs) = build(40, 10);
        let config = PipelineConfig {
            num_workers: 2,
            channel_capacity: 1,
            run_ahead: 1,
        };
        let mut pipeline = PrefetchPipeline::start(
            plan,
            source,
            specs,
            1,
            0,
            &config,
            Arc::new(FeedMetrics::new()),
        );
        let _ = pipeline.next().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), pipeline.stop())
            .await
            .expect("stop must return promptly");
        pipeline.stop().await; // idempotent
        assert!(matches!(
            pipeline.next().await,
            Err(FeedError::PipelineNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_empty_plan_ends_immediately() {
        let (_, source, specs) = build(4, 100);
        let plan = BucketingPlan {
            epoch: 1,
            batches: Vec::new(),
            oversized: Vec::new(),
        };
        let mut pipeline = PrefetchPipeline::start(
            plan,
            source,
            specs,
            1,
            0,
            &PipelineConfig::default(),
            Arc::new(FeedMetrics::new()),
        );
        assert!(pipeline.next().await.unwrap().is_none());
        pipeline.stop().await;
    }
}

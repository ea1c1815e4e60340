//! Unit tests for producer-side backpressure
//!
//! With channel capacity C, a producer must park on its push once C
//! batches await delivery, and every `next()` must release exactly one
//! parked push. Singleton batches make the loaded-sequence counter an
//! exact count of assembled batches.

use std::sync::Arc;
use std::time::Duration;

use seqfeed_core::batch::bucketer::{BucketConfig, BucketPlanner, BucketingPlan};
use seqfeed_core::corpus::sequence::ArraySpec;
use seqfeed_core::corpus::synthetic::SyntheticSpec;
use seqfeed_core::corpus::CorpusSpec;
use seqfeed_core::metrics::FeedMetrics;
use seqfeed_core::pipeline::{PipelineConfig, PrefetchPipeline};

fn singleton_plan(num_sequences: u64) -> (BucketingPlan, CorpusSpec, Vec<ArraySpec>) {
    let source = CorpusSpec::Synthetic(SyntheticSpec {
        num_sequences,
        feature_dim: 2,
        num_classes: 4,
        min_len: 2,
        max_len: 4,
        seed: 17,
    });
    let corpus = source.open().unwrap();
    let specs = corpus.array_specs().to_vec();
    let entries: Vec<(u64, usize)> = (0..num_sequences)
        .map(|id| (id, corpus.sequence_length(id).unwrap()))
        .collect();
    let plan = BucketPlanner::new(BucketConfig {
        max_padded_elems: 1000,
        max_seqs: Some(1),
        ..Default::default()
    })
    .plan(&entries, 1, 0);
    assert_eq!(plan.len(), num_sequences as usize);
    (plan, source, specs)
}

// Long enough for a parked producer to have made progress if it could
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_producer_parks_at_channel_capacity() {
    let (plan, source, specs) = singleton_plan(10);
    let metrics = Arc::new(FeedMetrics::new());
    let config = PipelineConfig {
        num_workers: 1,
        channel_capacity: 2,
        run_ahead: 10,
    };
    let mut pipeline =
        PrefetchPipeline::start(plan, source, specs, 1, 0, &config, metrics.clone());

    // The worker fills the channel (2 batches) and parks on the push
    // of a third; nothing past that gets assembled.
    settle().await;
    assert_eq!(metrics.sequences_loaded.get(), 3);
    settle().await;
    assert_eq!(
        metrics.sequences_loaded.get(),
        3,
        "parked producer must not run ahead of the channel"
    );

    // Each delivery frees one slot: exactly one parked push proceeds,
    // letting the worker assemble exactly one more batch.
    assert!(pipeline.next().await.unwrap().is_some());
    settle().await;
    assert_eq!(metrics.sequences_loaded.get(), 4);

    assert!(pipeline.next().await.unwrap().is_some());
    settle().await;
    assert_eq!(metrics.sequences_loaded.get(), 5);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_run_ahead_bounds_in_flight_batches() {
    let (plan, source, specs) = singleton_plan(10);
    let metrics = Arc::new(FeedMetrics::new());
    // Channel far wider than the permit budget: the limiter is the bound.
    let config = PipelineConfig {
        num_workers: 1,
        channel_capacity: 10,
        run_ahead: 2,
    };
    let mut pipeline =
        PrefetchPipeline::start(plan, source, specs, 1, 0, &config, metrics.clone());

    settle().await;
    assert_eq!(metrics.sequences_loaded.get(), 2);

    // Delivery releases the batch's permit, admitting one more.
    assert!(pipeline.next().await.unwrap().is_some());
    settle().await;
    assert_eq!(metrics.sequences_loaded.get(), 3);

    pipeline.stop().await;
}

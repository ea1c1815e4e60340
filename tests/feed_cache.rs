//! Write-through cache behavior of the feed facade
//!
//! The first open materializes the source into a cache file; later
//! opens serve from the file without touching the source again.

use tempfile::tempdir;

use seqfeed_core::batch::bucketer::BucketConfig;
use seqfeed_core::cache::reader::CacheReader;
use seqfeed_core::config::{FeedConfig, ShufflePolicy};
use seqfeed_core::corpus::synthetic::SyntheticSpec;
use seqfeed_core::corpus::CorpusSpec;
use seqfeed_core::error::FeedError;
use seqfeed_core::pipeline::PipelineConfig;
use seqfeed_core::CorpusFacade;

// Opt-in log output: RUST_LOG=debug cargo test --test feed_cache
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn config(cache_path: Option<std::path::PathBuf>) -> FeedConfig {
    init_logging();
    FeedConfig {
        source: CorpusSpec::Synthetic(SyntheticSpec {
            num_sequences: 12,
            feature_dim: 2,
            num_classes: 6,
            min_len: 3,
            max_len: 8,
            seed: 21,
        }),
        shuffle: ShufflePolicy::None,
        partition: None,
        subsample: None,
        bucketing: BucketConfig {
            max_padded_elems: 40,
            ..Default::default()
        },
        pipeline: PipelineConfig::default(),
        cache_path,
    }
}

#[tokio::test]
async fn test_first_open_materializes_cache() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("feed.sqfc");
    assert!(!path.exists());

    let mut feed = CorpusFacade::open(config(Some(path.clone()))).unwrap();
    assert!(path.exists(), "open must materialize the cache");
    feed.close().await;

    let reader = CacheReader::open_read(&path).unwrap();
    assert_eq!(reader.len(), 12);
    // Tags carried through from the source
    assert!(reader.tag(0).unwrap().is_some());
}

#[tokio::test]
async fn test_cached_delivery_matches_direct_delivery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("feed.sqfc");

    let mut direct = CorpusFacade::open(config(None)).unwrap();
    let mut cached = CorpusFacade::open(config(Some(path))).unwrap();

    direct.init_epoch(1).await.unwrap();
    cached.init_epoch(1).await.unwrap();

    loop {
        let a = direct.next().await.unwrap();
        let b = cached.next().await.unwrap();
        match (a, b) {
            (None, None) => break,
            (Some(a), Some(b)) => {
                assert_eq!(a.seq_ids(), b.seq_ids());
                for (key, array) in &a.arrays {
                    let other = &b.arrays[key];
                    assert_eq!(array.shape(), other.shape());
                    assert_eq!(array.data(), other.data(), "key '{}'", key);
                }
            }
            _ => panic!("direct and cached feeds disagree on epoch length"),
        }
    }
    direct.close().await;
    cached.close().await;
}

#[tokio::test]
async fn test_second_open_reuses_cache_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("feed.sqfc");

    let mut first = CorpusFacade::open(config(Some(path.clone()))).unwrap();
    first.close().await;
    let written = std::fs::metadata(&path).unwrap().modified().unwrap();

    // Exclusive-create would fail if this tried to rewrite the file
    let mut second = CorpusFacade::open(config(Some(path.clone()))).unwrap();
    second.init_epoch(1).await.unwrap();
    assert!(second.next().await.unwrap().is_some());
    second.close().await;

    assert_eq!(
        std::fs::metadata(&path).unwrap().modified().unwrap(),
        written,
        "reuse must not rewrite the file"
    );
}

#[tokio::test]
async fn test_cache_path_rejected_for_cache_source() {
    let dir = tempdir().unwrap();
    let cfg = FeedConfig {
        source: CorpusSpec::Cache {
            path: dir.path().join("a.sqfc"),
        },
        cache_path: Some(dir.path().join("b.sqfc")),
        ..config(None)
    };
    assert!(matches!(
        CorpusFacade::open(cfg),
        Err(FeedError::Config { .. })
    ));
}

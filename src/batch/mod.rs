//! Batching
//!
//! Pure bucketing/packing of sequence ids into a per-epoch plan, and
//! assembly of planned batches into padded, masked tensor stacks.

pub mod assemble;
pub mod bucketer;

pub use assemble::{assemble_batch, assemble_batch_cancellable, Batch, PaddingMask};
pub use bucketer::{BucketConfig, BucketPlanner, BucketingPlan, PlanItem, PlannedBatch};

//! Data sharding for bulk-synchronous training workers
//!
//! This crate provides:
//! - **Subset partitioning**: the contiguous range of dataset subsets each
//!   worker of the cohort owns for an epoch
//! - **Synchronization intervals**: how many subsets a worker consumes between
//!   two barrier rounds, and the resulting interval plan
//! - **Mini-batching** with deterministic per-interval shuffling
//!
//! # Example
//!
//! ```rust
//! use data_shard::{assigned_range, interval_plan, longest_range, subsets_per_interval};
//!
//! // 100 subsets over 4 workers, 3 synchronizations per epoch
//! let range = assigned_range(100, 4, 1).unwrap();
//! let span = longest_range(100, 4).unwrap();
//! let period = subsets_per_interval(3, 32, span, 64).unwrap();
//! let intervals = interval_plan(range, period, span.div_ceil(period));
//!
//! assert_eq!(intervals.len(), 3);
//! assert_eq!(intervals.last().unwrap().stop, range.stop);
//! ```

mod batches;
mod partition;

pub use batches::{MiniBatches, ShuffleKey};
pub use partition::{
    assigned_range, interval_plan, longest_range, subsets_per_interval, SubsetRange, WorkerPlan,
};

// Re-export types from runtime-core for convenience
pub use runtime_core::types::{Epoch, SubsetIndex, WorkerIndex};

//! Subset partitioning across the cohort and into synchronization intervals
//!
//! The coordinator and every worker call these functions independently and
//! must agree on the result without talking to each other, so everything here
//! is a pure function of its arguments.

use runtime_core::{Error, Result, SubsetIndex, WorkerIndex};
use serde::{Deserialize, Serialize};

/// Half-open range `[start, stop)` of dataset subsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsetRange {
    /// First subset (inclusive)
    pub start: SubsetIndex,

    /// End subset (exclusive)
    pub stop: SubsetIndex,
}

impl SubsetRange {
    pub fn new(start: SubsetIndex, stop: SubsetIndex) -> Self {
        debug_assert!(start <= stop, "inverted subset range {}..{}", start, stop);
        Self { start, stop }
    }

    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, subset: SubsetIndex) -> bool {
        subset >= self.start && subset < self.stop
    }
}

/// Range of subsets owned by `worker_index` out of `workers`
///
/// Splits `[0, total_subsets)` into `workers` contiguous ranges whose sizes
/// differ by at most one; the first `total_subsets % workers` workers carry
/// the extra subset. With more workers than subsets the tail workers get an
/// empty range.
pub fn assigned_range(
    total_subsets: u64,
    workers: u32,
    worker_index: WorkerIndex,
) -> Result<SubsetRange> {
    if workers == 0 {
        return Err(Error::invalid_config("cannot partition across zero workers"));
    }
    if worker_index >= workers {
        return Err(Error::invalid_config(format!(
            "worker index {} out of range for {} workers",
            worker_index, workers
        )));
    }

    let workers = workers as u64;
    let index = worker_index as u64;
    let base = total_subsets / workers;
    let extra = total_subsets % workers;

    let start = index * base + index.min(extra);
    let len = base + u64::from(index < extra);
    Ok(SubsetRange::new(start, start + len))
}

/// Length of the longest assigned range in a cohort, `ceil(total / workers)`
///
/// Every worker can compute this without knowing the others' ranges, which
/// makes it the shared basis for interval sizing.
pub fn longest_range(total_subsets: u64, workers: u32) -> Result<u64> {
    if workers == 0 {
        return Err(Error::invalid_config("cannot partition across zero workers"));
    }
    Ok(total_subsets.div_ceil(workers as u64))
}

/// Number of subsets a worker consumes between two synchronizations
///
/// ```text
/// by_frequency = ceil(span / k)
/// per_batch    = ceil(batch_size / items_per_subset)
/// period       = clamp(max(by_frequency, per_batch), 1, max(span, 1))
/// ```
///
/// `span` is the cohort's [`longest_range`], so every worker derives the same
/// period. `k` is the target number of synchronizations per epoch; a larger
/// `k` never yields a longer interval. An interval always holds enough
/// subsets for one full mini-batch unless the span itself is shorter.
pub fn subsets_per_interval(
    sync_frequency: u32,
    batch_size: u32,
    span: u64,
    items_per_subset: u64,
) -> Result<u64> {
    if sync_frequency == 0 {
        return Err(Error::invalid_config("sync frequency k must be at least 1"));
    }
    if batch_size == 0 {
        return Err(Error::invalid_config("batch size must be at least 1"));
    }
    if items_per_subset == 0 {
        return Err(Error::invalid_config("items per subset must be at least 1"));
    }

    let by_frequency = span.div_ceil(sync_frequency as u64);
    let per_batch = (batch_size as u64).div_ceil(items_per_subset);

    Ok(by_frequency.max(per_batch).clamp(1, span.max(1)))
}

/// Exactly `rounds` consecutive intervals of `period` subsets over `range`
///
/// Intervals are clipped to `range.stop`. A range one subset shorter than
/// the cohort's longest may end with an empty interval; it still counts as a
/// round so the worker meets the barrier as often as everyone else.
pub fn interval_plan(range: SubsetRange, period: u64, rounds: u64) -> Vec<SubsetRange> {
    let period = period.max(1);
    (0..rounds)
        .map(|i| {
            let start = range
                .start
                .saturating_add(i.saturating_mul(period))
                .min(range.stop);
            SubsetRange::new(start, start.saturating_add(period).min(range.stop))
        })
        .collect()
}

/// Everything one worker derives about its share of an epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPlan {
    pub worker_index: WorkerIndex,
    pub assigned: SubsetRange,
    pub subsets_per_interval: u64,
    /// Synchronization rounds of the cohort in one epoch
    pub rounds: u64,
    pub intervals: Vec<SubsetRange>,
}

impl WorkerPlan {
    /// Derive the plan for one worker
    ///
    /// Interval length and round count come from cohort-wide values only, so
    /// all non-empty workers get the same number of intervals. A worker with
    /// an empty range (more workers than subsets) gets none; the cohort then
    /// has a single round and no barrier to miss.
    pub fn derive(
        total_subsets: u64,
        workers: u32,
        worker_index: WorkerIndex,
        sync_frequency: u32,
        batch_size: u32,
        items_per_subset: u64,
    ) -> Result<Self> {
        let assigned = assigned_range(total_subsets, workers, worker_index)?;
        let span = longest_range(total_subsets, workers)?;
        let period = subsets_per_interval(sync_frequency, batch_size, span, items_per_subset)?;
        let rounds = span.div_ceil(period);

        let intervals = if assigned.is_empty() {
            Vec::new()
        } else {
            interval_plan(assigned, period, rounds)
        };

        Ok(Self {
            worker_index,
            assigned,
            subsets_per_interval: period,
            rounds,
            intervals,
        })
    }

    /// Number of barrier signals this worker sends in one invocation
    pub fn barrier_signals(&self) -> usize {
        self.intervals.len().saturating_sub(1)
    }
}

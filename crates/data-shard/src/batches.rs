//! Mini-batch iteration over one loaded interval

use fnv::FnvHasher;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use runtime_core::{Epoch, WorkerIndex};
use std::hash::Hasher;

use crate::SubsetRange;

/// Identifies one interval for seeding its shuffle
#[derive(Debug, Clone, Copy)]
pub struct ShuffleKey<'a> {
    pub seed: u64,
    pub job_id: &'a str,
    pub epoch: Epoch,
    pub worker_index: WorkerIndex,
    pub interval: SubsetRange,
}

impl ShuffleKey<'_> {
    /// Combine base seed, job, epoch, worker and interval into one RNG seed
    ///
    /// FNV-1a over little-endian field bytes, so a replay on another host or
    /// toolchain shuffles identically.
    pub fn rng_seed(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write(&self.seed.to_le_bytes());
        hasher.write(self.job_id.as_bytes());
        // 0xff never occurs in UTF-8, so the job id cannot run into the epoch
        hasher.write_u8(0xff);
        hasher.write(&self.epoch.to_le_bytes());
        hasher.write(&self.worker_index.to_le_bytes());
        hasher.write(&self.interval.start.to_le_bytes());
        hasher.write(&self.interval.stop.to_le_bytes());
        hasher.finish()
    }
}

/// Owned mini-batches cut from the items of one interval
///
/// The last batch may be shorter than `batch_size`.
#[derive(Debug, Clone)]
pub struct MiniBatches<T> {
    items: Vec<T>,
    batch_size: usize,
}

impl<T> MiniBatches<T> {
    /// Batches in load order (validation)
    pub fn sequential(items: Vec<T>, batch_size: usize) -> Self {
        Self {
            items,
            batch_size: batch_size.max(1),
        }
    }

    /// Batches over a deterministic permutation of the items (training)
    pub fn shuffled(mut items: Vec<T>, batch_size: usize, key: ShuffleKey<'_>) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(key.rng_seed());
        items.shuffle(&mut rng);
        tracing::trace!(
            job_id = key.job_id,
            epoch = key.epoch,
            worker = key.worker_index,
            items = items.len(),
            "Shuffled interval items"
        );
        Self::sequential(items, batch_size)
    }

    /// Number of items across all batches
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Number of batches
    pub fn len(&self) -> usize {
        self.items.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Chunks<'_, T> {
        self.items.chunks(self.batch_size)
    }
}

impl<'a, T> IntoIterator for &'a MiniBatches<T> {
    type Item = &'a [T];
    type IntoIter = std::slice::Chunks<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

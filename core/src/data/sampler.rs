//! Index orderings, and the per-epoch split of a dataset across ranks.
//!
//! [`partition`] is a pure function of `(total_samples, world_size, epoch)` plus
//! options. Every rank computes the full split locally and keeps its own chunk,
//! so ranks agree on ownership without exchanging anything.

use crate::error::{Error, Result};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// A trait for determining the order of data access.
pub trait Sampler: Send + Sync {
    /// Returns the indices to visit, in order, for a dataset of length `len`.
    fn sample(&self, len: usize) -> Vec<usize>;
}

/// Samples elements sequentially, always in the same order.
pub struct SequentialSampler;

impl Sampler for SequentialSampler {
    fn sample(&self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

/// What to do when `total_samples` is not a multiple of `world_size`.
///
/// Both policies hand every rank the same number of indices. Ranks therefore run
/// the same number of batches and issue the same number of collectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemainderPolicy {
    /// Wrap around the permutation until it reaches `world_size * ceil(total / world_size)`.
    /// The first `padded - total` permuted indices are visited twice per epoch.
    #[default]
    Pad,
    /// Truncate to `world_size * floor(total / world_size)`. The last
    /// `total % world_size` permuted indices are skipped this epoch.
    DropLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionOptions {
    /// Base seed; the shuffle for epoch `e` is seeded with `seed + e`.
    pub seed: u64,
    pub remainder: RemainderPolicy,
}

/// Splits `[0, total_samples)` across `world_size` ranks for `epoch`, using
/// seed 0 and [`RemainderPolicy::Pad`].
pub fn partition(total_samples: usize, world_size: usize, epoch: usize) -> Result<Vec<Vec<usize>>> {
    partition_with(total_samples, world_size, epoch, &PartitionOptions::default())
}

/// Splits `[0, total_samples)` across `world_size` ranks for `epoch`.
///
/// The permutation depends only on `options.seed + epoch`, never on the rank.
/// After applying the remainder policy it is cut into `world_size` contiguous
/// chunks of equal length; chunk `r` belongs to rank `r`.
///
/// # Errors
///
/// `Error::InvalidWorldSize` if `world_size == 0`.
pub fn partition_with(
    total_samples: usize,
    world_size: usize,
    epoch: usize,
    options: &PartitionOptions,
) -> Result<Vec<Vec<usize>>> {
    if world_size == 0 {
        return Err(Error::InvalidWorldSize);
    }
    if total_samples == 0 {
        return Ok(vec![Vec::new(); world_size]);
    }

    let mut order: Vec<usize> = (0..total_samples).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed.wrapping_add(epoch as u64));
    order.shuffle(&mut rng);

    let per_rank = match options.remainder {
        RemainderPolicy::Pad => total_samples.div_ceil(world_size),
        RemainderPolicy::DropLast => total_samples / world_size,
    };
    let wanted = per_rank * world_size;

    // Wraps more than once only when world_size > total_samples.
    let order: Vec<usize> = order.iter().copied().cycle().take(wanted).collect();

    Ok((0..world_size)
        .map(|r| order[r * per_rank..(r + 1) * per_rank].to_vec())
        .collect())
}

/// Visits exactly the indices `partition_with` assigns to `rank` for `epoch`.
///
/// Built fresh for every epoch; there is no epoch setter.
#[derive(Debug, Clone)]
pub struct PartitionSampler {
    rank: usize,
    world_size: usize,
    epoch: usize,
    options: PartitionOptions,
}

impl PartitionSampler {
    pub fn new(rank: usize, world_size: usize, epoch: usize, options: PartitionOptions) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::InvalidWorldSize);
        }
        if rank >= world_size {
            return Err(Error::InvalidRank { rank, world_size });
        }
        Ok(Self {
            rank,
            world_size,
            epoch,
            options,
        })
    }

    /// Number of indices this rank receives from a dataset of length `len`.
    pub fn num_samples(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        match self.options.remainder {
            RemainderPolicy::Pad => len.div_ceil(self.world_size),
            RemainderPolicy::DropLast => len / self.world_size,
        }
    }
}

impl Sampler for PartitionSampler {
    fn sample(&self, len: usize) -> Vec<usize> {
        // world_size and rank were validated in `new`, so the split cannot fail.
        partition_with(len, self.world_size, self.epoch, &self.options)
            .map(|mut parts| parts.swap_remove(self.rank))
            .unwrap_or_default()
    }
}

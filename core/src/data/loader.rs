//! DataLoader implementation.

use super::{Dataset, Sampler, SequentialSampler};
use crate::error::Result;
use std::marker::PhantomData;

/// Batches items from a dataset in sampler order.
///
/// The sampler runs once per `iter()` call, so a loader built around a
/// [`super::PartitionSampler`] yields exactly one rank's share of one epoch.
pub struct DataLoader<'a, D, T>
where
    D: Dataset<T> + ?Sized,
{
    dataset: &'a D,
    batch_size: usize,
    sampler: Box<dyn Sampler>,
    drop_last: bool,
    _marker: PhantomData<T>,
}

impl<'a, D, T> DataLoader<'a, D, T>
where
    D: Dataset<T> + ?Sized,
{
    /// Creates a sequential loader. A `batch_size` of zero is treated as one.
    pub fn new(dataset: &'a D, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            sampler: Box::new(SequentialSampler),
            drop_last: false,
            _marker: PhantomData,
        }
    }

    /// Sets the sampler to use.
    pub fn with_sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Sets whether to drop the last incomplete batch.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Number of batches `iter()` will yield.
    pub fn num_batches(&self) -> usize {
        let n = self.sampler.sample(self.dataset.len()).len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Returns an iterator of batches. Each batch is `Err` if any of its items
    /// failed to load.
    pub fn iter(&self) -> DataLoaderIter<'a, D, T> {
        DataLoaderIter {
            dataset: self.dataset,
            indices: self.sampler.sample(self.dataset.len()),
            batch_size: self.batch_size,
            current_idx: 0,
            drop_last: self.drop_last,
            _marker: PhantomData,
        }
    }
}

/// Iterator for DataLoader.
pub struct DataLoaderIter<'a, D, T>
where
    D: Dataset<T> + ?Sized,
{
    dataset: &'a D,
    indices: Vec<usize>,
    batch_size: usize,
    current_idx: usize,
    drop_last: bool,
    _marker: PhantomData<T>,
}

impl<D, T> Iterator for DataLoaderIter<'_, D, T>
where
    D: Dataset<T> + ?Sized,
{
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx >= self.indices.len() {
            return None;
        }

        let remaining = self.indices.len() - self.current_idx;
        if self.drop_last && remaining < self.batch_size {
            return None;
        }

        let take = remaining.min(self.batch_size);
        let batch_indices = &self.indices[self.current_idx..self.current_idx + take];
        self.current_idx += take;

        Some(
            batch_indices
                .iter()
                .map(|&idx| self.dataset.get(idx))
                .collect(),
        )
    }
}

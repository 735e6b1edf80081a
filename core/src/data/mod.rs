//! Sample stores, sampling and batching.
//!
//! - [`Dataset`]: indexable, length-known collection of samples.
//! - [`sampler`]: index orderings, including the per-epoch rank [`partition`].
//! - [`DataLoader`]: batches a dataset in the order a sampler dictates.
//! - [`synthetic`]: a seeded stand-in for the search-term store.

pub mod loader;
pub mod sampler;
pub mod synthetic;

pub use loader::DataLoader;
pub use sampler::{
    PartitionOptions, PartitionSampler, RemainderPolicy, Sampler, SequentialSampler, partition,
    partition_with,
};

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::sync::Arc;

/// Random access to data items.
///
/// Stores are read-only; every rank may read any index concurrently.
pub trait Dataset<T>: Send + Sync {
    /// Returns the total number of items in the dataset.
    fn len(&self) -> usize;

    /// Returns `true` if the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the item at `index`.
    ///
    /// # Errors
    ///
    /// `Error::DataAccess` if the item cannot be produced.
    fn get(&self, index: usize) -> Result<T>;
}

impl<T: Clone + Send + Sync> Dataset<T> for Vec<T> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, index: usize) -> Result<T> {
        self.as_slice().get(index).cloned().ok_or(Error::DataAccess {
            index,
            reason: format!("index out of range for {} items", self.as_slice().len()),
        })
    }
}

impl<T, D: Dataset<T> + ?Sized> Dataset<T> for Arc<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<T> {
        (**self).get(index)
    }
}

/// A contiguous window `[offset, offset + len)` of another dataset.
#[derive(Debug)]
pub struct Subset<'a, D: ?Sized> {
    inner: &'a D,
    offset: usize,
    len: usize,
}

impl<'a, D: ?Sized> Subset<'a, D> {
    /// The window is clamped to the end of `inner`.
    pub fn new<T>(inner: &'a D, offset: usize, len: usize) -> Self
    where
        D: Dataset<T>,
    {
        let offset = offset.min(inner.len());
        let len = len.min(inner.len() - offset);
        Self { inner, offset, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T, D: Dataset<T> + ?Sized> Dataset<T> for Subset<'_, D> {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<T> {
        if index >= self.len {
            return Err(Error::DataAccess {
                index,
                reason: format!("index out of range for a subset of {} items", self.len),
            });
        }
        self.inner.get(self.offset + index)
    }
}

/// The contact graph shared by every sample: node count plus directed edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    num_nodes: usize,
    edges: Vec<(usize, usize)>,
}

impl Graph {
    pub fn new(num_nodes: usize, edges: Vec<(usize, usize)>) -> Result<Self> {
        if let Some(&(u, v)) = edges.iter().find(|(u, v)| *u >= num_nodes || *v >= num_nodes) {
            return Err(Error::Config(format!(
                "edge ({u}, {v}) references a node outside 0..{num_nodes}"
            )));
        }
        Ok(Self { num_nodes, edges })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Symmetrically normalised adjacency with self loops, `D^-1/2 (A + I) D^-1/2`.
    ///
    /// Edges are treated as undirected and duplicates collapse to one.
    pub fn normalized_adjacency(&self) -> Tensor<f32, 2> {
        let n = self.num_nodes;
        let mut adj = vec![0.0f32; n * n];
        for i in 0..n {
            adj[i * n + i] = 1.0;
        }
        for &(u, v) in &self.edges {
            adj[u * n + v] = 1.0;
            adj[v * n + u] = 1.0;
        }

        let inv_sqrt_deg: Vec<f32> = adj
            .chunks(n.max(1))
            .take(n)
            .map(|row| 1.0 / row.iter().sum::<f32>().sqrt())
            .collect();

        for i in 0..n {
            for j in 0..n {
                adj[i * n + j] *= inv_sqrt_deg[i] * inv_sqrt_deg[j];
            }
        }

        Tensor::from_fn([n, n], |k| adj[k])
    }
}

/// One training example: node features for a date and the per-node targets one
/// week later.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSample {
    /// `[num_nodes, num_features]`; the last column is the per-date scalar feature.
    pub features: Tensor<f32, 2>,
    /// `[1, num_nodes]`.
    pub target: Tensor<f32, 2>,
}

/// A store that also exposes the graph its samples live on.
pub trait GraphDataset: Dataset<GraphSample> {
    fn graph(&self) -> &Graph;

    /// Feature width of every sample.
    fn num_features(&self) -> usize;
}

/// Samples held in memory next to their shared graph.
#[derive(Debug, Clone)]
pub struct InMemoryGraphDataset {
    graph: Graph,
    num_features: usize,
    samples: Vec<GraphSample>,
}

impl InMemoryGraphDataset {
    /// Checks every sample against the graph before accepting it.
    pub fn new(graph: Graph, samples: Vec<GraphSample>) -> Result<Self> {
        let n = graph.num_nodes();
        let num_features = samples.first().map(|s| s.features.shape()[1]).unwrap_or(0);
        for s in &samples {
            if s.features.shape() != &[n, num_features] {
                return Err(Error::ShapeMismatch {
                    expected: vec![n, num_features],
                    got: s.features.shape().to_vec(),
                });
            }
            if s.target.shape() != &[1, n] {
                return Err(Error::ShapeMismatch {
                    expected: vec![1, n],
                    got: s.target.shape().to_vec(),
                });
            }
        }
        Ok(Self {
            graph,
            num_features,
            samples,
        })
    }

    /// Splits into `(first mid samples, rest)`, both sharing the graph.
    pub fn split_at(self, mid: usize) -> (Self, Self) {
        let mut head = self.samples;
        let tail = head.split_off(mid.min(head.len()));
        (
            Self {
                graph: self.graph.clone(),
                num_features: self.num_features,
                samples: head,
            },
            Self {
                graph: self.graph,
                num_features: self.num_features,
                samples: tail,
            },
        )
    }
}

impl Dataset<GraphSample> for InMemoryGraphDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<GraphSample> {
        Dataset::get(&self.samples, index)
    }
}

impl GraphDataset for InMemoryGraphDataset {
    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn num_features(&self) -> usize {
        self.num_features
    }
}

//! A seeded, in-memory stand-in for the search-term store.
//!
//! Every rank that builds a store from the same [`SyntheticConfig`] gets
//! byte-identical samples, so a multi-process run needs no shared files.

use super::{Graph, GraphSample, InMemoryGraphDataset};
use crate::error::Result;
use crate::tensor::Tensor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Regions (graph nodes).
    pub num_nodes: usize,
    /// Search terms per region, before the appended case-count column.
    pub num_terms: usize,
    /// Dated samples; the store simulates one extra week for the last target.
    pub num_samples: usize,
    /// Extra random edges on top of the ring that keeps the graph connected.
    pub extra_edges: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_nodes: 51,
            num_terms: 3243,
            num_samples: 57,
            extra_edges: 100,
            seed: 7,
        }
    }
}

/// Builds the store described by `config`.
///
/// Case counts follow a per-region multiplicative random walk. Each search term
/// tracks next week's count in its region with its own gain plus noise, and the
/// current week's count is appended as the last feature column.
pub fn generate(config: &SyntheticConfig) -> Result<InMemoryGraphDataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let n = config.num_nodes;

    let mut edges: Vec<(usize, usize)> = (0..n).map(|i| (i, (i + 1) % n)).collect();
    if n > 1 {
        for _ in 0..config.extra_edges {
            let u = rng.random_range(0..n);
            let v = rng.random_range(0..n);
            if u != v {
                edges.push((u, v));
            }
        }
    }
    let graph = Graph::new(n, edges)?;

    let weeks = config.num_samples + 1;
    let mut cases = vec![vec![0.0f32; n]; weeks];
    for node in 0..n {
        cases[0][node] = rng.random_range(10.0..500.0f32);
    }
    for w in 1..weeks {
        for node in 0..n {
            let growth = rng.random_range(0.85..1.25f32);
            cases[w][node] = (cases[w - 1][node] * growth).round().max(0.0);
        }
    }

    let gains: Vec<f32> = (0..config.num_terms)
        .map(|_| rng.random_range(0.0..0.01f32))
        .collect();
    let width = config.num_terms + 1;

    let mut samples = Vec::with_capacity(config.num_samples);
    for w in 0..config.num_samples {
        let mut features = Vec::with_capacity(n * width);
        for node in 0..n {
            let upcoming = cases[w + 1][node];
            for &gain in &gains {
                let noise: f32 = rng.random_range(-1.0..1.0);
                features.push((gain * upcoming + noise).max(0.0));
            }
            features.push(cases[w][node]);
        }
        samples.push(GraphSample {
            features: Tensor::new(features, [n, width])?,
            target: Tensor::new(cases[w + 1].clone(), [1, n])?,
        });
    }

    InMemoryGraphDataset::new(graph, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, GraphDataset};

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            num_nodes: 5,
            num_terms: 4,
            num_samples: 6,
            extra_edges: 3,
            seed: 11,
        }
    }

    #[test]
    fn test_shapes() {
        let ds = generate(&small()).unwrap();
        assert_eq!(ds.len(), 6);
        assert_eq!(ds.num_features(), 5);
        assert_eq!(ds.graph().num_nodes(), 5);
        let s = ds.get(0).unwrap();
        assert_eq!(s.features.shape(), &[5, 5]);
        assert_eq!(s.target.shape(), &[1, 5]);
    }

    #[test]
    fn test_same_seed_same_store() {
        let a = generate(&small()).unwrap();
        let b = generate(&small()).unwrap();
        for i in 0..a.len() {
            assert_eq!(a.get(i).unwrap(), b.get(i).unwrap());
        }
        assert_eq!(a.graph(), b.graph());
    }

    #[test]
    fn test_target_is_next_weeks_case_column() {
        let ds = generate(&small()).unwrap();
        let s0 = ds.get(0).unwrap();
        let s1 = ds.get(1).unwrap();
        // Week 1's appended case count is week 0's target.
        for node in 0..5 {
            let last_col = s1.features.data()[node * 5 + 4];
            assert_eq!(last_col, s0.target.data()[node]);
        }
    }
}

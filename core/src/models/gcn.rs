//! Graph-convolution regressor over a region graph.
//!
//! Input features `[nodes, features]` are divided by their Frobenius norm, then
//! pass through a stack of [`GraphConv`] layers with ReLU and dropout between
//! them. The last layer has width 1, and its `[nodes, 1]` output is returned
//! transposed as `[1, nodes]`: one forecast per region.
//!
//! ```rust
//! use searchcast::data::Graph;
//! use searchcast::models::{Gcn, GcnConfig, Trainable};
//! use searchcast::tensor::Tensor;
//!
//! let graph = Graph::new(3, vec![(0, 1), (1, 2)]).unwrap();
//! let config = GcnConfig {
//!     in_features: 4,
//!     hidden: vec![8, 4],
//!     ..GcnConfig::default()
//! };
//! let mut model = Gcn::new(&config, &graph, 42).unwrap();
//! let y = model.forward(&Tensor::ones([3, 4])).unwrap();
//! assert_eq!(y.shape(), &[1, 3]);
//! ```

use super::{Parameter, Trainable};
use crate::data::Graph;
use crate::error::{Error, Result};
use crate::nn::{Dropout, GraphConv, Module, Relu};
use crate::tensor::Tensor;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct GcnConfig {
    /// Feature width of each node, including the appended scalar column.
    pub in_features: usize,
    /// Widths of the hidden layers; a width-1 output layer follows them.
    pub hidden: Vec<usize>,
    pub dropout: f32,
    /// Seeds the dropout masks. Unlike the init seed it may differ per rank.
    pub dropout_seed: u64,
}

impl Default for GcnConfig {
    fn default() -> Self {
        Self {
            in_features: 3244,
            hidden: vec![2000, 1000, 500, 100, 10],
            dropout: 0.5,
            dropout_seed: 0,
        }
    }
}

/// Hidden block after every layer but the last.
#[derive(Debug)]
struct Block {
    relu: Relu,
    dropout: Dropout,
}

#[derive(Debug)]
pub struct Gcn {
    layers: Vec<GraphConv>,
    blocks: Vec<Block>,
}

impl Gcn {
    /// Builds the network for `graph`. Two models built from the same config,
    /// graph and `init_seed` have bit-identical parameters.
    pub fn new(config: &GcnConfig, graph: &Graph, init_seed: u64) -> Result<Self> {
        if config.in_features == 0 || config.hidden.contains(&0) {
            return Err(Error::Config(format!(
                "layer widths must be positive: in {} hidden {:?}",
                config.in_features, config.hidden
            )));
        }
        let adjacency = Arc::new(graph.normalized_adjacency());
        let mut rng = ChaCha8Rng::seed_from_u64(init_seed);

        let mut widths = Vec::with_capacity(config.hidden.len() + 2);
        widths.push(config.in_features);
        widths.extend_from_slice(&config.hidden);
        widths.push(1);

        let layers: Vec<GraphConv> = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| GraphConv::new(&format!("conv{}", i + 1), w[0], w[1], Arc::clone(&adjacency), &mut rng))
            .collect();

        let blocks = (0..layers.len() - 1)
            .map(|i| {
                Ok(Block {
                    relu: Relu::new(),
                    dropout: Dropout::new(config.dropout, config.dropout_seed.wrapping_add(i as u64))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { layers, blocks })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl Trainable for Gcn {
    type Input = Tensor<f32, 2>;

    fn forward(&mut self, input: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        // Scale is treated as a constant; no gradient flows through the norm.
        let norm = input.norm() as f32;
        let mut h = if norm > 0.0 { input.map(|x| x / norm) } else { input.clone() };

        for (i, layer) in self.layers.iter_mut().enumerate() {
            h = layer.forward(&h)?;
            if let Some(block) = self.blocks.get_mut(i) {
                h = block.relu.forward(&h)?;
                h = block.dropout.forward(&h)?;
            }
        }
        h.transpose()
    }

    fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<()> {
        let mut g = grad_output.transpose()?;
        for i in (0..self.layers.len()).rev() {
            if let Some(block) = self.blocks.get_mut(i) {
                g = block.dropout.backward(&g)?;
                g = block.relu.backward(&g)?;
            }
            if i == 0 {
                self.layers[i].backward_params(&g)?;
            } else {
                g = self.layers[i].backward(&g)?;
            }
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers.iter_mut().flat_map(|l| l.parameters_mut()).collect()
    }

    fn set_training(&mut self, training: bool) {
        for block in &mut self.blocks {
            block.dropout.set_training(training);
        }
    }
}

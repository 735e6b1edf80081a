//! # searchcast
//!
//! `searchcast` trains a graph-convolution forecaster with synchronous
//! data-parallel SGD. Every worker process holds a full replica of the model,
//! trains on its own partition of each epoch, and averages gradients with its
//! peers over a TCP ring before every optimizer step.
//!
//! It runs on **CPU only**; collectives are plain sockets, no accelerator
//! runtime is involved.
//!
//! ## Modules
//!
//! - [`distributed`]: process group rendezvous, ring all-reduce and the
//!   gradient-averaging wrapper.
//! - [`data`]: the sample store, per-epoch partitioning and batching.
//! - [`models`]: the trainable-model contract and the GCN regressor.
//! - [`nn`]: layers with hand-written backward passes.
//! - [`optim`], [`loss`]: Adam/SGD and the L1 objective.
//! - [`trainer`]: the per-rank loop tying the above together.
//! - [`checkpoint`]: safetensors persistence of the trained parameters.
//! - [`config`]: rendezvous environment and training hyperparameters.
//!
//! ## Example
//!
//! A single-process run needs no network:
//!
//! ```rust
//! use searchcast::config::TrainConfig;
//! use searchcast::data::synthetic::{self, SyntheticConfig};
//! use searchcast::data::GraphDataset;
//! use searchcast::distributed::ProcessGroup;
//! use searchcast::models::{Gcn, GcnConfig};
//! use searchcast::optim::AdamW;
//! use searchcast::trainer::Trainer;
//!
//! let data = synthetic::generate(&SyntheticConfig {
//!     num_nodes: 4,
//!     num_terms: 3,
//!     num_samples: 6,
//!     extra_edges: 2,
//!     seed: 1,
//! })
//! .unwrap();
//! let gcn = GcnConfig {
//!     in_features: data.num_features(),
//!     hidden: vec![8],
//!     ..GcnConfig::default()
//! };
//! let model = Gcn::new(&gcn, data.graph(), 42).unwrap();
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = TrainConfig {
//!     epochs: 2,
//!     train_len: Some(4),
//!     checkpoint_path: dir.path().join("model.safetensors"),
//!     ..TrainConfig::default()
//! };
//! let group = ProcessGroup::solo();
//! let mut trainer = Trainer::new(model, &group, AdamW::adam(0.005), config).unwrap();
//! let report = trainer.fit(&data).unwrap();
//! assert_eq!(report.epochs.len(), 2);
//! assert!(report.checkpoint.is_some());
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod distributed;
pub mod error;
pub mod loss;
pub mod models;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod trainer;

pub use error::{Error, Result};
pub use tensor::{Tensor, TensorElem};

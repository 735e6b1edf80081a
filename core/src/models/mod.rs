//! Trainable models.
//!
//! - [`traits`]: the [`Trainable`] interface the distributed wrapper and trainer
//!   drive, and the named [`Parameter`] every model exposes.
//! - [`gcn`]: the graph-convolution network that forecasts per-region case counts.

pub mod gcn;
pub mod traits;

pub use gcn::{Gcn, GcnConfig};
pub use traits::{Parameter, Trainable, flatten_grads, unflatten_grads};

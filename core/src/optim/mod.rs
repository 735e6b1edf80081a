//! Optimizers.
//!
//! An optimizer sees the same parameters, in the same order, with the same
//! (already averaged) gradients on every rank. Its updates are element-wise and
//! deterministic, so replicas that start equal stay equal.

pub mod adamw;
pub mod sgd;
pub use adamw::AdamW;
pub use sgd::Sgd;

use crate::error::Result;
use crate::models::Parameter;
use crate::tensor::Tensor;

/// A trait for optimizers (e.g., SGD, Adam).
///
/// Optimizers are responsible for updating model parameters based on computed gradients.
pub trait Optimizer {
    /// Updates one tensor in place. `key` identifies the parameter across steps,
    /// for optimizers that keep per-parameter state.
    ///
    /// # Errors
    ///
    /// Returns an error if `param` and `grad` shapes differ.
    fn update<const RANK: usize>(
        &mut self,
        key: usize,
        param: &mut Tensor<f32, RANK>,
        grad: &Tensor<f32, RANK>,
    ) -> Result<()>;

    /// Applies one step to every parameter, keyed by position.
    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()> {
        for (key, p) in params.into_iter().enumerate() {
            let Parameter { value, grad, .. } = p;
            self.update(key, value, grad)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32;
}

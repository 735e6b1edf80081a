use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// A named trainable tensor and the gradient accumulated for it.
///
/// Parameters are always rank 2; a bias is a `[1, out]` row.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Tensor<f32, 2>,
    pub grad: Tensor<f32, 2>,
}

impl Parameter {
    /// Wraps `value` with a zeroed gradient of the same shape.
    pub fn new(name: impl Into<String>, value: Tensor<f32, 2>) -> Self {
        let grad = Tensor::zeros(*value.shape());
        Self {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill_zero();
    }

    /// Adds `delta` into the accumulated gradient.
    pub fn accumulate_grad(&mut self, delta: &Tensor<f32, 2>) -> Result<()> {
        self.grad.add_scaled_(delta, 1.0)
    }

    pub fn numel(&self) -> usize {
        self.value.size()
    }
}

/// A model whose gradients are computed by hand-written backward passes.
///
/// `forward` caches whatever `backward` needs, so a `backward` call refers to the
/// most recent `forward`. `backward` adds into each [`Parameter::grad`]; callers
/// zero gradients between optimizer steps.
pub trait Trainable {
    type Input;

    fn forward(&mut self, input: &Self::Input) -> Result<Tensor<f32, 2>>;

    /// Accumulates parameter gradients given `dLoss/dOutput` for the last forward.
    fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<()>;

    /// Parameters in a fixed order that is identical on every rank.
    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Switches between training behaviour (dropout on) and evaluation.
    fn set_training(&mut self, _training: bool) {}

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}

/// Copies every gradient, in parameter order, into one contiguous buffer.
pub fn flatten_grads(params: &[&Parameter]) -> Vec<f32> {
    let total = params.iter().map(|p| p.numel()).sum();
    let mut flat = Vec::with_capacity(total);
    for p in params {
        flat.extend_from_slice(p.grad.data());
    }
    flat
}

/// Writes a buffer produced by [`flatten_grads`] back into the gradients.
pub fn unflatten_grads(params: &mut [&mut Parameter], flat: &[f32]) -> Result<()> {
    let total: usize = params.iter().map(|p| p.numel()).sum();
    if total != flat.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![total],
            got: vec![flat.len()],
        });
    }
    let mut offset = 0;
    for p in params.iter_mut() {
        let n = p.numel();
        p.grad.data_mut().copy_from_slice(&flat[offset..offset + n]);
        offset += n;
    }
    Ok(())
}

use crate::error::Result;
use crate::models::Parameter;
use crate::tensor::Tensor;
use std::fmt::Debug;

/// A Module trait for Neural Network layers.
///
/// Layers map `[rows, in] -> [rows, out]` and keep whatever their backward pass
/// needs from the latest `forward`. `backward` takes `dLoss/dOutput`, adds the
/// parameter gradients into each [`Parameter::grad`] and returns `dLoss/dInput`.
///
/// Requiring `Send` and `Sync` lets a model move onto a worker thread, which is
/// how the in-process ranks run.
pub trait Module: Debug + Send + Sync {
    fn forward(&mut self, input: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>>;

    fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>>;

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Negate;

    impl Module for Negate {
        fn forward(&mut self, input: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
            Ok(input.map(|x| -x))
        }

        fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
            Ok(grad_output.map(|g| -g))
        }
    }

    #[test]
    fn test_parameterless_module() {
        let mut m = Negate;
        let x = Tensor::new(vec![1.0, -2.0], [1, 2]).unwrap();
        assert_eq!(m.forward(&x).unwrap().data(), &[-1.0, 2.0]);
        assert!(m.parameters().is_empty());
    }
}

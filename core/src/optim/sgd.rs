use super::Optimizer;
use crate::error::Result;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Stochastic Gradient Descent (SGD) optimizer.
///
/// Updates parameters using the rule:
/// `param = param - learning_rate * grad`
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn update<const RANK: usize>(
        &mut self,
        _key: usize,
        param: &mut Tensor<f32, RANK>,
        grad: &Tensor<f32, RANK>,
    ) -> Result<()> {
        param.expect_same_shape(grad)?;

        let lr = self.learning_rate;
        param
            .data_mut()
            .par_iter_mut()
            .zip(grad.data().par_iter())
            .for_each(|(p, g)| {
                *p -= lr * *g;
            });

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Parameter;

    #[test]
    fn test_sgd_update() {
        let mut sgd = Sgd::new(0.1);
        let mut param = Tensor::new(vec![1.0, 2.0], [2]).unwrap();
        let grad = Tensor::new(vec![0.5, -0.5], [2]).unwrap();

        sgd.update(0, &mut param, &grad).unwrap();

        // [1.0, 2.0] - 0.1 * [0.5, -0.5]
        assert!((param.data()[0] - 0.95).abs() < 1e-6);
        assert!((param.data()[1] - 2.05).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_update_shape_mismatch() {
        let mut sgd = Sgd::new(0.1);
        let mut param = Tensor::new(vec![1.0, 2.0], [2]).unwrap();
        let grad = Tensor::new(vec![0.5], [1]).unwrap();

        assert!(sgd.update(0, &mut param, &grad).is_err());
    }

    #[test]
    fn test_step_over_parameters() {
        let mut sgd = Sgd::new(1.0);
        let mut w = Parameter::new("w", Tensor::ones([1, 2]));
        w.grad = Tensor::new(vec![0.25, 0.5], [1, 2]).unwrap();
        sgd.step(vec![&mut w]).unwrap();
        assert_eq!(w.value.data(), &[0.75, 0.5]);
    }
}

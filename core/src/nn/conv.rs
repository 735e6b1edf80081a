use super::Module;
use crate::error::{Error, Result};
use crate::models::Parameter;
use crate::tensor::Tensor;
use rand::Rng;
use std::sync::Arc;

/// Graph convolution (Kipf & Welling).
///
/// `Y = Â X W + b`, where `Â = D^-1/2 (A + I) D^-1/2` is the symmetric
/// normalized adjacency shared by every layer of a network. `X` is `[nodes, in]`
/// and `Y` is `[nodes, out]`.
#[derive(Debug)]
pub struct GraphConv {
    pub weight: Parameter,
    pub bias: Parameter,
    adjacency: Arc<Tensor<f32, 2>>,
    /// `Â X` from the last forward.
    propagated: Option<Tensor<f32, 2>>,
}

impl GraphConv {
    /// Glorot-uniform weight, zero bias.
    pub fn new(
        name: &str,
        in_features: usize,
        out_features: usize,
        adjacency: Arc<Tensor<f32, 2>>,
        rng: &mut impl Rng,
    ) -> Self {
        let limit = (6.0 / (in_features + out_features).max(1) as f32).sqrt();
        let weight = Tensor::from_fn([in_features, out_features], |_| rng.random_range(-limit..=limit));
        Self {
            weight: Parameter::new(format!("{name}.weight"), weight),
            bias: Parameter::new(format!("{name}.bias"), Tensor::zeros([1, out_features])),
            adjacency,
            propagated: None,
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.value.shape()[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight.value.shape()[1]
    }

    /// Accumulates `dW = (Â X)^T G` and `db = sum_rows(G)` without computing the
    /// input gradient. The first layer of a network needs nothing more.
    pub fn backward_params(&mut self, grad_output: &Tensor<f32, 2>) -> Result<()> {
        let ax = self
            .propagated
            .as_ref()
            .ok_or_else(|| Error::BackwardBeforeForward {
                layer: self.weight.name.trim_end_matches(".weight").to_string(),
            })?;
        let d_weight = ax.transpose()?.matmul(grad_output)?;
        self.weight.accumulate_grad(&d_weight)?;
        self.bias.accumulate_grad(&grad_output.sum_rows())?;
        Ok(())
    }
}

impl Module for GraphConv {
    fn forward(&mut self, input: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        let ax = self.adjacency.matmul(input)?;
        let mut out = ax.matmul(&self.weight.value)?;
        out.add_row_(&self.bias.value)?;
        self.propagated = Some(ax);
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        self.backward_params(grad_output)?;
        // Â is symmetric, so Â^T (G W^T) = Â (G W^T).
        let g_wt = grad_output.matmul(&self.weight.value.transpose()?)?;
        self.adjacency.matmul(&g_wt)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn identity(n: usize) -> Arc<Tensor<f32, 2>> {
        Arc::new(Tensor::from_fn([n, n], |k| if k / n == k % n { 1.0 } else { 0.0 }))
    }

    #[test]
    fn test_forward_shape_and_bias() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut conv = GraphConv::new("conv1", 3, 2, identity(4), &mut rng);
        conv.weight.value.fill_zero();
        conv.bias.value = Tensor::new(vec![1.0, -1.0], [1, 2]).unwrap();

        let y = conv.forward(&Tensor::ones([4, 3])).unwrap();
        assert_eq!(y.shape(), &[4, 2]);
        assert!(y.data().chunks(2).all(|r| r == [1.0, -1.0]));
        assert_eq!(conv.parameters()[0].name, "conv1.weight");
    }

    #[test]
    fn test_backward_before_forward() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut conv = GraphConv::new("conv2", 3, 2, identity(4), &mut rng);
        let err = conv.backward(&Tensor::ones([4, 2])).unwrap_err();
        assert!(matches!(&err, Error::BackwardBeforeForward { layer } if layer == "conv2"), "got {err:?}");
    }

    #[test]
    fn test_glorot_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let conv = GraphConv::new("c", 10, 6, identity(2), &mut rng);
        let limit = (6.0f32 / 16.0).sqrt();
        assert!(conv.weight.value.data().iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_gradients_match_finite_difference() {
        // Loss = sum(Y), so dL/dY is all ones.
        let adj = Arc::new(Tensor::new(vec![0.5, 0.5, 0.5, 0.5], [2, 2]).unwrap());
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut conv = GraphConv::new("c", 2, 1, adj, &mut rng);
        let x = Tensor::new(vec![1.0, 2.0, 3.0, -1.0], [2, 2]).unwrap();

        conv.forward(&x).unwrap();
        let dx = conv.backward(&Tensor::ones([2, 1])).unwrap();

        let eps = 1e-2f32;
        let loss = |c: &mut GraphConv, x: &Tensor<f32, 2>| c.forward(x).unwrap().sum_f64() as f32;
        for i in 0..2 {
            let mut bumped = conv.weight.value.clone();
            bumped.data_mut()[i] += eps;
            let base = loss(&mut conv, &x);
            let saved = std::mem::replace(&mut conv.weight.value, bumped);
            let numeric = (loss(&mut conv, &x) - base) / eps;
            conv.weight.value = saved;
            assert!((numeric - conv.weight.grad.data()[i]).abs() < 1e-2);
        }
        assert_eq!(conv.bias.grad.data(), &[2.0]);

        for i in 0..4 {
            let mut bumped = x.clone();
            bumped.data_mut()[i] += eps;
            let numeric = (loss(&mut conv, &bumped) - loss(&mut conv, &x)) / eps;
            assert!((numeric - dx.data()[i]).abs() < 1e-2);
        }
    }
}

use super::Optimizer;
use crate::error::Result;
use crate::tensor::Tensor;
use rayon::prelude::*;
use std::collections::HashMap;

/// AdamW optimizer.
///
/// Implements Adam algorithm with Weight Decay fix as described in [Decoupled Weight Decay Regularization](https://arxiv.org/abs/1711.05101).
/// With `weight_decay = 0` it is plain Adam.
///
/// # Formula
///
/// $$
/// \begin{aligned}
/// & m_t = \beta_1 m_{t-1} + (1 - \beta_1) g_t \\
/// & v_t = \beta_2 v_{t-1} + (1 - \beta_2) g_t^2 \\
/// & \hat{m}_t = m_t / (1 - \beta_1^t) \\
/// & \hat{v}_t = v_t / (1 - \beta_2^t) \\
/// & \theta_t = \theta_{t-1} - \eta (\hat{m}_t / (\sqrt{\hat{v}_t} + \epsilon) + \lambda \theta_{t-1})
/// \end{aligned}
/// $$
#[derive(Debug, Clone)]
pub struct AdamW {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    /// Key -> (m, v, step), flat so any tensor shape fits.
    state: HashMap<usize, (Vec<f32>, Vec<f32>, u64)>,
}

impl AdamW {
    /// Creates a new AdamW optimizer with betas `(0.9, 0.999)`, epsilon `1e-8`
    /// and weight decay `0.01`.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
            state: HashMap::new(),
        }
    }

    /// Adam: AdamW without weight decay.
    pub fn adam(learning_rate: f32) -> Self {
        Self::new(learning_rate).with_weight_decay(0.0)
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Number of steps taken for parameter `key`.
    pub fn steps(&self, key: usize) -> u64 {
        self.state.get(&key).map_or(0, |(_, _, t)| *t)
    }
}

impl Optimizer for AdamW {
    fn update<const RANK: usize>(
        &mut self,
        key: usize,
        param: &mut Tensor<f32, RANK>,
        grad: &Tensor<f32, RANK>,
    ) -> Result<()> {
        param.expect_same_shape(grad)?;

        let size = param.size();
        let (m, v, step) = self
            .state
            .entry(key)
            .or_insert_with(|| (vec![0.0; size], vec![0.0; size], 0));
        *step += 1;

        let lr = self.learning_rate;
        let b1 = self.beta1;
        let b2 = self.beta2;
        let eps = self.epsilon;
        let lambda = self.weight_decay;

        // Computed in f64 so the correction is the same whatever the step count.
        let bias_correction1 = (1.0 - f64::from(b1).powi(*step as i32)) as f32;
        let bias_correction2 = (1.0 - f64::from(b2).powi(*step as i32)) as f32;

        param
            .data_mut()
            .par_iter_mut()
            .zip(grad.data().par_iter())
            .zip(m.par_iter_mut())
            .zip(v.par_iter_mut())
            .for_each(|(((p, g), m_elem), v_elem)| {
                *m_elem = b1 * *m_elem + (1.0 - b1) * *g;
                *v_elem = b2 * *v_elem + (1.0 - b2) * *g * *g;

                let m_hat = *m_elem / bias_correction1;
                let v_hat = *v_elem / bias_correction2;

                *p -= lr * (m_hat / (v_hat.sqrt() + eps) + lambda * *p);
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

    #[test]
    fn test_adamw_new() {
        let adam = AdamW::new(0.001);
        assert_eq!(adam.learning_rate, 0.001);
        assert_eq!(adam.beta1, 0.9);
        assert_eq!(adam.weight_decay, 0.01);
        assert_eq!(AdamW::adam(0.005).weight_decay, 0.0);
    }

    #[test]
    fn test_adamw_update() {
        let mut adam = AdamW::adam(0.1);
        let mut param = Tensor::new(vec![1.0], [1]).unwrap();
        let grad = Tensor::new(vec![0.1], [1]).unwrap();

        adam.update(0, &mut param, &grad).unwrap();

        // m_hat = 0.1, v_hat = 0.01, p = 1.0 - 0.1 * (0.1 / 0.1) = 0.9
        let p = param.data()[0];
        assert!((p - 0.9).abs() < 1e-5, "Step 1 failed: p={}", p);

        // A constant gradient keeps m_hat / sqrt(v_hat) at 1.
        adam.update(0, &mut param, &grad).unwrap();
        assert!((param.data()[0] - 0.8).abs() < 1e-4);
        assert_eq!(adam.steps(0), 2);
        assert_eq!(adam.steps(1), 0);
    }

    #[test]
    fn test_weight_decay_shrinks_without_gradient() {
        let mut adam = AdamW::new(0.1).with_weight_decay(0.5);
        let mut param = Tensor::new(vec![2.0], [1]).unwrap();
        let grad = Tensor::new(vec![0.0], [1]).unwrap();
        adam.update(0, &mut param, &grad).unwrap();
        // p -= 0.1 * (0 + 0.5 * 2.0)
        assert!((param.data()[0] - 1.9).abs() < 1e-6);
    }
}

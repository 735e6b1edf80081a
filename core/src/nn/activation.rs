//! Activation and regularization layers.
//!
//! - **ReLU**: $f(x) = \max(0, x)$.
//! - **Dropout**: zeroes each activation with probability `p` during training and
//!   scales the survivors by `1 / (1 - p)`; the identity in evaluation mode.

use super::Module;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Element-wise `max(0, x)`.
#[derive(Debug, Default)]
pub struct Relu {
    /// 1.0 where the last input was positive, else 0.0.
    mask: Option<Tensor<f32, 2>>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for Relu {
    fn forward(&mut self, input: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        self.mask = Some(input.map(|x| if x > 0.0 { 1.0 } else { 0.0 }));
        Ok(input.map(|x| x.max(0.0)))
    }

    fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        let mask = self.mask.as_ref().ok_or_else(|| Error::BackwardBeforeForward {
            layer: "relu".to_string(),
        })?;
        grad_output * mask
    }
}

/// Inverted dropout with its own seeded random stream.
#[derive(Debug)]
pub struct Dropout {
    p: f32,
    training: bool,
    rng: ChaCha8Rng,
    /// `0` or `1 / (1 - p)` per element; `None` in evaluation mode.
    mask: Option<Tensor<f32, 2>>,
}

impl Dropout {
    /// # Errors
    ///
    /// `Error::Config` unless `0 <= p < 1`.
    pub fn new(p: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::Config(format!("dropout probability {p} is outside [0, 1)")));
        }
        Ok(Self {
            p,
            training: true,
            rng: ChaCha8Rng::seed_from_u64(seed),
            mask: None,
        })
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl Module for Dropout {
    fn forward(&mut self, input: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        if !self.training || self.p == 0.0 {
            self.mask = None;
            return Ok(input.clone());
        }
        let keep = 1.0 / (1.0 - self.p);
        let p = self.p;
        let rng = &mut self.rng;
        let mask = Tensor::from_fn(*input.shape(), |_| {
            if rng.random::<f32>() < p { 0.0 } else { keep }
        });
        let out = (input * &mask)?;
        self.mask = Some(mask);
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<Tensor<f32, 2>> {
        match &self.mask {
            Some(mask) => grad_output * mask,
            None => Ok(grad_output.clone()),
        }
    }
}

//! Regression losses.
//!
//! Each function returns the mean loss together with its gradient with respect to
//! `prediction`, so a training step needs no autograd graph.

use crate::error::Result;
use crate::tensor::Tensor;

/// Mean absolute error, `mean(|prediction - target|)`.
///
/// The gradient is `sign(prediction - target) / n`, with `sign(0) = 0`.
///
/// # Errors
///
/// `Error::ShapeMismatch` if the shapes differ.
pub fn l1_loss<const RANK: usize>(
    prediction: &Tensor<f32, RANK>,
    target: &Tensor<f32, RANK>,
) -> Result<(f32, Tensor<f32, RANK>)> {
    let diff = (prediction - target)?;
    let n = diff.size().max(1) as f32;
    let loss = diff.data().iter().map(|d| f64::from(d.abs())).sum::<f64>() / f64::from(n);
    let grad = diff.map(|d| {
        if d > 0.0 {
            1.0 / n
        } else if d < 0.0 {
            -1.0 / n
        } else {
            0.0
        }
    });
    Ok((loss as f32, grad))
}

/// Mean squared error, `mean((prediction - target)^2)`, with gradient
/// `2 (prediction - target) / n`.
///
/// # Errors
///
/// `Error::ShapeMismatch` if the shapes differ.
pub fn mse_loss<const RANK: usize>(
    prediction: &Tensor<f32, RANK>,
    target: &Tensor<f32, RANK>,
) -> Result<(f32, Tensor<f32, RANK>)> {
    let diff = (prediction - target)?;
    let n = diff.size().max(1) as f32;
    let loss = diff.data().iter().map(|d| f64::from(d * d)).sum::<f64>() / f64::from(n);
    let grad = diff.map(|d| 2.0 * d / n);
    Ok((loss as f32, grad))
}

//! Tensor arithmetic.
//!
//! Element-wise operators require identical shapes (no broadcasting), except for
//! the explicit row-broadcast used to add a bias vector. Element-wise work runs on
//! rayon; every output element depends on one input position only, so results are
//! bit-identical whatever the thread count.
//!
//! ```rust
//! use searchcast::tensor::Tensor;
//!
//! let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
//! let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0]);
//! ```

use super::{Tensor, TensorElem};
use crate::error::{Error, Result};

use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

/// Implements a shape-checked element-wise operator for `&Tensor`.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T, const RANK: usize> $trait for &Tensor<T, RANK>
        where
            T: TensorElem,
        {
            type Output = Result<Tensor<T, RANK>>;

            fn $method(self, rhs: Self) -> Self::Output {
                self.expect_same_shape(rhs)?;

                let mut out = Tensor::zeros(self.shape);
                out.data
                    .par_iter_mut()
                    .zip(self.data.par_iter())
                    .zip(rhs.data.par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Applies `f` to every element, producing a tensor of the same shape.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    /// Multiplies every element by `factor` in place.
    pub fn scale_(&mut self, factor: T) {
        self.data.par_iter_mut().for_each(|x| *x = *x * factor);
    }

    /// `self += alpha * other`, in place.
    pub fn add_scaled_(&mut self, other: &Self, alpha: T) -> Result<()> {
        self.expect_same_shape(other)?;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(x, y)| *x += alpha * *y);
        Ok(())
    }

    /// Sum of all elements, accumulated sequentially in `f64`.
    pub fn sum_f64(&self) -> f64 {
        self.data
            .iter()
            .map(|x| x.to_f64().unwrap_or(f64::NAN))
            .sum()
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.data
            .iter()
            .map(|x| {
                let v = x.to_f64().unwrap_or(f64::NAN);
                v * v
            })
            .sum::<f64>()
            .sqrt()
    }
}

impl<T> Tensor<T, 2>
where
    T: TensorElem,
{
    /// `[M, K] x [K, N] -> [M, N]`, delegated to the CPU kernel.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        let [m, k] = self.shape;
        let [k2, n] = rhs.shape;
        if k != k2 {
            return Err(Error::ShapeMismatch {
                expected: vec![k, n],
                got: vec![k2, n],
            });
        }
        let data = searchcast_kernels::cpu_matmul(&self.data, &rhs.data, &self.shape, &rhs.shape)?;
        Ok(Tensor {
            shape: [m, n],
            data,
        })
    }

    /// Swaps the two dimensions.
    pub fn transpose(&self) -> Result<Self> {
        let data = searchcast_kernels::cpu_transpose(&self.data, &self.shape)?;
        Ok(Tensor {
            shape: [self.shape[1], self.shape[0]],
            data,
        })
    }

    /// Adds a `[1, N]` row to every row of an `[M, N]` tensor, in place.
    pub fn add_row_(&mut self, row: &Self) -> Result<()> {
        let cols = self.shape[1];
        if row.shape != [1, cols] {
            return Err(Error::ShapeMismatch {
                expected: vec![1, cols],
                got: row.shape.to_vec(),
            });
        }
        if cols == 0 {
            return Ok(());
        }
        self.data.par_chunks_mut(cols).for_each(|r| {
            for (x, b) in r.iter_mut().zip(row.data.iter()) {
                *x += *b;
            }
        });
        Ok(())
    }

    /// Column sums: `[M, N] -> [1, N]`. Rows are accumulated in order.
    pub fn sum_rows(&self) -> Self {
        let cols = self.shape[1];
        let mut out = vec![T::zero(); cols];
        if cols > 0 {
            for r in self.data.chunks(cols) {
                for (o, x) in out.iter_mut().zip(r.iter()) {
                    *o += *x;
                }
            }
        }
        Tensor {
            shape: [1, cols],
            data: out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
        let b = Tensor::<f32, 1>::new(vec![3.0, 5.0], [2]).unwrap();
        assert_eq!((&a + &b).unwrap().data(), &[4.0, 7.0]);
        assert_eq!((&b - &a).unwrap().data(), &[2.0, 3.0]);
        assert_eq!((&a * &b).unwrap().data(), &[3.0, 10.0]);
        assert_eq!((&b / &a).unwrap().data(), &[3.0, 2.5]);

        let c = Tensor::<f32, 1>::zeros([3]);
        assert!((&a + &c).is_err());
    }

    #[test]
    fn test_map_and_scale() {
        let t = Tensor::<f32, 1>::new(vec![1.0, -2.0, 3.0], [3]).unwrap();
        let relu = t.map(|x| if x > 0.0 { x } else { 0.0 });
        assert_eq!(relu.data(), &[1.0, 0.0, 3.0]);

        let mut s = t.clone();
        s.scale_(0.5);
        assert_eq!(s.data(), &[0.5, -1.0, 1.5]);
    }

    #[test]
    fn test_add_scaled() {
        let mut a = Tensor::<f32, 1>::new(vec![1.0, 1.0], [2]).unwrap();
        let b = Tensor::<f32, 1>::new(vec![2.0, 4.0], [2]).unwrap();
        a.add_scaled_(&b, 0.5).unwrap();
        assert_eq!(a.data(), &[2.0, 3.0]);
    }

    #[test]
    fn test_matmul_2d() {
        let a = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let b = Tensor::<f32, 2>::new(vec![5.0, 6.0, 7.0, 8.0], [2, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);

        let bad = Tensor::<f32, 2>::zeros([3, 2]);
        assert!(matches!(a.matmul(&bad), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_transpose() {
        let t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let tt = t.transpose().unwrap();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_row_broadcast_and_sum_rows() {
        let mut t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let bias = Tensor::<f32, 2>::new(vec![10.0, 20.0], [1, 2]).unwrap();
        t.add_row_(&bias).unwrap();
        assert_eq!(t.data(), &[11.0, 22.0, 13.0, 24.0]);
        assert_eq!(t.sum_rows().data(), &[24.0, 46.0]);

        let wrong = Tensor::<f32, 2>::zeros([2, 1]);
        assert!(t.add_row_(&wrong).is_err());
    }

    #[test]
    fn test_norm() {
        let t = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();
        assert!((t.norm() - 5.0).abs() < 1e-12);
        assert!((t.sum_f64() - 7.0).abs() < 1e-12);
    }
}

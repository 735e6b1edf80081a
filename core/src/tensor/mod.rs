//! Dense CPU tensors.
//!
//! A [`Tensor`] is a flat row-major `Vec<T>` plus a const-rank shape. Rank is part
//! of the type; the extent of each dimension is checked at runtime, which keeps
//! variable node counts and feature widths cheap to express.
//!
//! ```rust
//! use searchcast::tensor::Tensor;
//!
//! let t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
//! assert_eq!(t.shape(), &[2, 3]);
//! assert_eq!(t.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! ```

use crate::error::{Error, Result};
use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;

pub mod ops;

/// Trait bound for elements that can be stored in a Tensor.
///
/// `Send + Sync` is needed because kernels run on the rayon pool.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// An N-dimensional array of `T` stored contiguously in row-major order.
#[derive(Clone, PartialEq)]
pub struct Tensor<T, const RANK: usize>
where
    T: TensorElem,
{
    shape: [usize; RANK],
    data: Vec<T>,
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Creates a tensor from flat data.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeMismatch` if `data.len()` is not the product of `shape`.
    pub fn new(data: Vec<T>, shape: [usize; RANK]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(Error::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a new Tensor filled with zeros.
    pub fn zeros(shape: [usize; RANK]) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: vec![T::zero(); size],
        }
    }

    /// Creates a new Tensor filled with ones.
    pub fn ones(shape: [usize; RANK]) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: vec![T::one(); size],
        }
    }

    /// Builds a tensor by calling `f` with each flat index in order.
    pub fn from_fn(shape: [usize; RANK], f: impl FnMut(usize) -> T) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: (0..size).map(f).collect(),
        }
    }

    /// Reinterprets the data under a new shape with the same element count.
    pub fn reshape<const NEW_RANK: usize>(
        self,
        new_shape: [usize; NEW_RANK],
    ) -> Result<Tensor<T, NEW_RANK>> {
        let new_size: usize = new_shape.iter().product();
        if self.data.len() != new_size {
            return Err(Error::ShapeMismatch {
                expected: vec![self.data.len()],
                got: vec![new_size],
            });
        }
        Ok(Tensor {
            shape: new_shape,
            data: self.data,
        })
    }

    pub const fn shape(&self) -> &[usize; RANK] {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Sets every element to zero without reallocating.
    pub fn fill_zero(&mut self) {
        self.data.iter_mut().for_each(|x| *x = T::zero());
    }

    /// Fails with `Error::ShapeMismatch` unless `other` has the same shape.
    pub fn expect_same_shape(&self, other: &Self) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: other.shape.to_vec(),
            });
        }
        Ok(())
    }
}

impl<T, const RANK: usize> Debug for Tensor<T, RANK>
where
    T: TensorElem,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.size(), 4);

        let err = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0], [2, 2]);
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_zeros_ones() {
        let z = Tensor::<f32, 2>::zeros([2, 3]);
        assert!(z.data().iter().all(|&x| x == 0.0));
        let o = Tensor::<f32, 1>::ones([4]);
        assert!(o.data().iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_from_fn_and_fill_zero() {
        let mut t = Tensor::<f32, 2>::from_fn([2, 2], |i| i as f32);
        assert_eq!(t.data(), &[0.0, 1.0, 2.0, 3.0]);
        t.fill_zero();
        assert_eq!(t.data(), &[0.0; 4]);
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let r = t.clone().reshape([6]).unwrap();
        assert_eq!(r.shape(), &[6]);
        assert!(t.reshape([4]).is_err());
    }

    #[test]
    fn test_expect_same_shape() {
        let a = Tensor::<f32, 2>::zeros([1, 3]);
        let b = Tensor::<f32, 2>::zeros([3, 1]);
        assert!(a.expect_same_shape(&a.clone()).is_ok());
        assert!(matches!(
            a.expect_same_shape(&b),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_tensor_debug() {
        let t = Tensor::<f32, 1>::zeros([3]);
        let s = format!("{:?}", t);
        assert!(s.contains("shape: [3]"));
        assert!(s.contains("data_len: 3"));
    }
}

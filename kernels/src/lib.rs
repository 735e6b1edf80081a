//! CPU kernels behind `searchcast` tensors.
//!
//! Kernels work on flat row-major slices plus a `[rows, cols]` shape so they can be
//! swapped for a BLAS call without touching the tensor type.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_matmul;
pub mod cpu_transpose;

pub use cpu_matmul::cpu_matmul;
pub use cpu_transpose::cpu_transpose;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Buffer of length {len} does not hold a {rows}x{cols} matrix")]
    BadBuffer { len: usize, rows: usize, cols: usize },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Element bound for kernel inputs. Mirrors `TensorElem` in the main crate.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
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

pub(crate) fn check_buffer<T>(data: &[T], shape: &[usize; 2]) -> Result<()> {
    if data.len() != shape[0] * shape[1] {
        return Err(KernelError::BadBuffer {
            len: data.len(),
            rows: shape[0],
            cols: shape[1],
        });
    }
    Ok(())
}

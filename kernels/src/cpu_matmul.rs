use crate::{KernelElem, Result, check_buffer};
use rayon::prelude::*;

/// Row-major matrix product `[m, k] x [k, n] -> [m, n]`.
///
/// The right-hand side is transposed first so the inner dot product walks two
/// contiguous slices. Output rows are computed in parallel; each output element
/// is summed sequentially over `k`, so the result does not depend on the
/// number of rayon threads.
pub fn cpu_matmul<T>(
    lhs_data: &[T],
    rhs_data: &[T],
    lhs_shape: &[usize; 2],
    rhs_shape: &[usize; 2],
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_buffer(lhs_data, lhs_shape)?;
    check_buffer(rhs_data, rhs_shape)?;

    let [m, k] = *lhs_shape;
    let n = rhs_shape[1];
    if k != rhs_shape[0] {
        return Err(crate::KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![rhs_shape[0]],
        });
    }

    let mut out = vec![T::zero(); m * n];
    if m == 0 || n == 0 {
        return Ok(out);
    }

    let rhs_t = super::cpu_transpose::cpu_transpose(rhs_data, rhs_shape)?;

    out.par_chunks_mut(n).enumerate().for_each(|(row, out_row)| {
        let a = &lhs_data[row * k..(row + 1) * k];
        for (col, out_elem) in out_row.iter_mut().enumerate() {
            let b = &rhs_t[col * k..(col + 1) * k];
            let mut sum = T::zero();
            for (&x, &y) in a.iter().zip(b.iter()) {
                sum += x * y;
            }
            *out_elem = sum;
        }
    });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelError;

    #[test]
    fn test_matmul_square() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];

        let result = cpu_matmul(&a, &b, &[2, 2], &[2, 2]).unwrap();
        // [1*5+2*7, 1*6+2*8] = [19, 22]
        // [3*5+4*7, 3*6+4*8] = [43, 50]
        assert_eq!(result, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        // [1, 3] x [3, 2]
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let result = cpu_matmul(&a, &b, &[1, 3], &[3, 2]).unwrap();
        assert_eq!(result, vec![4.0, 5.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = vec![1.0; 4];
        let b = vec![1.0; 6];
        let err = cpu_matmul(&a, &b, &[2, 2], &[3, 2]);
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }
}

use crate::{KernelElem, Result, check_buffer};
use rayon::prelude::*;

/// Transposes a row-major `[rows, cols]` matrix into `[cols, rows]`.
///
/// Parallelized over output rows, so each worker reads one strided input column.
pub fn cpu_transpose<T>(data: &[T], shape: &[usize; 2]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_buffer(data, shape)?;
    let [rows, cols] = *shape;
    let mut out = vec![T::zero(); rows * cols];
    if rows == 0 || cols == 0 {
        return Ok(out);
    }

    out.par_chunks_mut(rows).enumerate().for_each(|(c, out_row)| {
        for (r, slot) in out_row.iter_mut().enumerate() {
            *slot = data[r * cols + c];
        }
    });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelError;

    #[test]
    fn test_transpose_rectangular() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let result = cpu_transpose(&data, &[2, 3]).unwrap();
        assert_eq!(result, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_transpose_column_vector() {
        let data = vec![7.0f32, 8.0, 9.0];
        let result = cpu_transpose(&data, &[3, 1]).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_transpose_bad_buffer() {
        let err = cpu_transpose(&[1.0f32; 5], &[2, 3]);
        assert!(matches!(err, Err(KernelError::BadBuffer { len: 5, .. })));
    }
}

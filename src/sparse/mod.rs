use std::ops::AddAssign;

use anyhow::anyhow;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use num_traits::{NumCast, PrimInt, Unsigned, Zero};

use crate::{FloatOps, NumericOps};

pub mod csc;
pub mod csr;

pub trait MatrixShape {
    /// `(rows, columns)`
    fn shape(&self) -> (usize, usize);
}

pub trait MatrixNonZero {
    fn nonzero_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign;

    fn nonzero_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign;
}

pub trait MatrixSum {
    type Item: NumCast;

    fn sum_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: FloatOps;

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: FloatOps;
}

/// Population mean and variance along an axis. Implicit zeros count as observations,
/// so the denominator is always the full length of the axis.
pub trait MatrixVariance {
    type Item: NumCast;

    fn mean_var_col<T>(&self) -> anyhow::Result<(Vec<T>, Vec<T>)>
    where
        T: FloatOps;

    fn mean_var_row<T>(&self) -> anyhow::Result<(Vec<T>, Vec<T>)>
    where
        T: FloatOps;
}

/// Row and column subsetting. Indices are taken in the given order and may not repeat.
pub trait MatrixSelect: Sized {
    fn select_rows(&self, rows: &[usize]) -> anyhow::Result<Self>;

    fn select_cols(&self, cols: &[usize]) -> anyhow::Result<Self>;
}

/// Concatenates matrices side by side. All blocks must share the row count; the
/// columns of the result are the columns of `blocks[0]`, then `blocks[1]`, and so on.
pub fn hstack<M: NumericOps>(blocks: &[&CscMatrix<M>]) -> anyhow::Result<CscMatrix<M>> {
    let first = blocks
        .first()
        .ok_or_else(|| anyhow!("Cannot concatenate an empty list of matrices"))?;
    let nrows = first.nrows();

    let mut ncols = 0;
    let mut nnz = 0;
    for (i, block) in blocks.iter().enumerate() {
        if block.nrows() != nrows {
            return Err(anyhow!(
                "Block {} has {} rows, expected {}",
                i,
                block.nrows(),
                nrows
            ));
        }
        ncols += block.ncols();
        nnz += block.nnz();
    }

    let mut col_offsets = Vec::with_capacity(ncols + 1);
    let mut row_indices = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);
    col_offsets.push(0);

    for block in blocks {
        for col in block.col_iter() {
            row_indices.extend_from_slice(col.row_indices());
            values.extend_from_slice(col.values());
            col_offsets.push(row_indices.len());
        }
    }

    CscMatrix::try_from_csc_data(nrows, ncols, col_offsets, row_indices, values)
        .map_err(|e| anyhow!("Failed to build concatenated matrix: {}", e))
}

/// Reinterprets a genes × cells CSC matrix as the cells × genes CSR matrix with the
/// same storage.
pub fn transpose_to_csr<M: NumericOps>(x: &CscMatrix<M>) -> anyhow::Result<CsrMatrix<M>> {
    let (nrows, ncols) = (x.nrows(), x.ncols());
    let (offsets, indices, values) = x.clone().disassemble();
    CsrMatrix::try_from_csr_data(ncols, nrows, offsets, indices, values)
        .map_err(|e| anyhow!("Failed to build transposed matrix: {}", e))
}

fn cast<M: NumCast, T: FloatOps>(value: M) -> anyhow::Result<T> {
    T::from(value).ok_or_else(|| anyhow!("Failed to convert to target type"))
}

fn axis_len<T: FloatOps>(len: usize) -> anyhow::Result<T> {
    if len == 0 {
        return Err(anyhow!("Cannot compute statistics along an empty axis"));
    }
    T::from(len).ok_or_else(|| anyhow!("Failed to convert axis length"))
}

/// Adds the contribution of the implicit zeros, `(len - nnz) * mean^2`, and divides by `len`.
fn finish_variance<T: FloatOps>(
    squared_diffs: &mut [T],
    means: &[T],
    nonzero: &[usize],
    len: usize,
) -> anyhow::Result<()> {
    let n: T = axis_len(len)?;
    for ((acc, &mean), &nnz) in squared_diffs.iter_mut().zip(means).zip(nonzero) {
        let zeros: T = cast(len - nnz)?;
        *acc = (*acc + zeros * mean * mean) / n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn block(nrows: usize, ncols: usize, entries: &[(usize, usize, f64)]) -> CscMatrix<f64> {
        let mut coo = CooMatrix::new(nrows, ncols);
        for &(r, c, v) in entries {
            coo.push(r, c, v);
        }
        CscMatrix::from(&coo)
    }

    #[test]
    fn test_hstack_keeps_column_order() {
        let a = block(3, 2, &[(0, 0, 1.0), (2, 1, 2.0)]);
        let b = block(3, 1, &[(1, 0, 3.0)]);

        let stacked = hstack(&[&a, &b]).unwrap();
        assert_eq!(stacked.nrows(), 3);
        assert_eq!(stacked.ncols(), 3);

        let triplets: Vec<(usize, usize, f64)> =
            stacked.triplet_iter().map(|(r, c, &v)| (r, c, v)).collect();
        assert_eq!(triplets, vec![(0, 0, 1.0), (2, 1, 2.0), (1, 2, 3.0)]);
    }

    #[test]
    fn test_hstack_with_empty_block() {
        let a = block(2, 2, &[(0, 0, 1.0)]);
        let empty: CscMatrix<f64> = CscMatrix::zeros(2, 0);

        let stacked = hstack(&[&empty, &a, &empty]).unwrap();
        assert_eq!(stacked.ncols(), 2);
        assert_eq!(stacked.nnz(), 1);
    }

    #[test]
    fn test_hstack_row_mismatch() {
        let a = block(3, 1, &[]);
        let b = block(2, 1, &[]);
        assert!(hstack(&[&a, &b]).is_err());
        assert!(hstack::<f64>(&[]).is_err());
    }

    #[test]
    fn test_transpose_to_csr() {
        let genes_by_cells = block(2, 3, &[(0, 1, 4.0), (1, 2, 5.0), (1, 0, 1.5), (0, 0, 2.0)]);
        let cells_by_genes = transpose_to_csr(&genes_by_cells).unwrap();

        assert_eq!((cells_by_genes.nrows(), cells_by_genes.ncols()), (3, 2));
        let mut triplets: Vec<(usize, usize, f64)> =
            cells_by_genes.triplet_iter().map(|(r, c, &v)| (r, c, v)).collect();
        triplets.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        assert_eq!(triplets, vec![(0, 0, 2.0), (0, 1, 1.5), (1, 0, 4.0), (2, 1, 5.0)]);
    }
}

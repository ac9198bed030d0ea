use anyhow::bail;
use nalgebra_sparse::CscMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::utils::{Direction, Normalize};
use crate::FloatOps;

impl<T: FloatOps> Normalize<T> for Array2<T> {
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()> {
        match direction {
            Direction::ROW => {
                if sums.len() != self.nrows() {
                    bail!(
                        "Length of sums ({}) does not match number of rows ({})",
                        sums.len(),
                        self.nrows()
                    );
                }

                for (mut row, &sum) in self.rows_mut().into_iter().zip(sums) {
                    if sum > T::zero() {
                        let scale = target / sum;
                        row.mapv_inplace(|v| v * scale);
                    }
                }
            }
            Direction::COLUMN => {
                if sums.len() != self.ncols() {
                    bail!(
                        "Length of sums ({}) does not match number of columns ({})",
                        sums.len(),
                        self.ncols()
                    );
                }

                for (mut col, &sum) in self.columns_mut().into_iter().zip(sums) {
                    if sum > T::zero() {
                        let scale = target / sum;
                        col.mapv_inplace(|v| v * scale);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Euclidean norm of every column.
pub fn column_norms<T: FloatOps>(x: ArrayView2<T>) -> Array1<T> {
    x.map_axis(Axis(0), |col| col.iter().map(|&v| v * v).sum::<T>().sqrt())
}

/// Rescales every nonzero column of `x` to unit Euclidean norm. All-zero columns stay zero.
pub fn normalize_columns_l2<T: FloatOps>(x: &mut Array2<T>) -> anyhow::Result<()> {
    let norms = column_norms(x.view()).to_vec();
    x.normalize(&norms, T::one(), &Direction::COLUMN)
}

/// Dense transpose of a genes × cells matrix: one row per cell, one column per gene.
pub fn transpose_to_dense(x: &CscMatrix<f64>) -> Array2<f64> {
    let mut dense = Array2::zeros((x.ncols(), x.nrows()));
    for (cell, col) in x.col_iter().enumerate() {
        let mut row = dense.row_mut(cell);
        for (&gene, &value) in col.row_indices().iter().zip(col.values()) {
            row[gene] = value;
        }
    }
    dense
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_normalize() {
        let mut arr = array![[1.0, 2.0], [3.0, 4.0]];
        let row_sums = vec![3.0, 7.0];
        let target = 1.0;

        arr.normalize(&row_sums, target, &Direction::ROW).unwrap();

        assert_relative_eq!(arr.row(0).sum(), target);
        assert_relative_eq!(arr.row(1).sum(), target);
        assert_relative_eq!(arr[[0, 0]], 1.0 / 3.0);
        assert_relative_eq!(arr[[1, 1]], 4.0 / 7.0);

        let mut arr = array![[1.0, 2.0], [3.0, 4.0]];
        let col_sums = vec![4.0, 6.0];

        arr.normalize(&col_sums, target, &Direction::COLUMN).unwrap();

        assert_relative_eq!(arr.column(0).sum(), target);
        assert_relative_eq!(arr.column(1).sum(), target);
        assert_relative_eq!(arr[[1, 0]], 3.0 / 4.0);
        assert_relative_eq!(arr[[0, 1]], 2.0 / 6.0);
    }

    #[test]
    fn test_normalize_errors() {
        let mut arr = Array2::<f64>::zeros((2, 2));

        assert!(arr.normalize(&[1.0], 1.0, &Direction::ROW).is_err());
        assert!(arr.normalize(&[1.0], 1.0, &Direction::COLUMN).is_err());
    }

    #[test]
    fn test_normalize_columns_l2() {
        let mut arr = array![[3.0, 0.0, 1.0], [4.0, 0.0, 1.0]];
        normalize_columns_l2(&mut arr).unwrap();

        let norms = column_norms(arr.view());
        assert_relative_eq!(norms[0], 1.0, epsilon = 1e-12);
        assert_eq!(norms[1], 0.0);
        assert_relative_eq!(norms[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(arr[[0, 0]], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_transpose_to_dense() {
        let mut coo = nalgebra_sparse::CooMatrix::new(2, 3);
        coo.push(0, 1, 4.0);
        coo.push(1, 2, 5.0);
        coo.push(1, 0, 1.5);
        let csc = CscMatrix::from(&coo);

        let dense = transpose_to_dense(&csc);
        assert_eq!(dense, array![[0.0, 1.5], [4.0, 0.0], [0.0, 5.0]]);
    }
}

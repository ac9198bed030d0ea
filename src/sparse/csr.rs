use std::ops::AddAssign;

use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use num_traits::{PrimInt, Unsigned, Zero};

use crate::{FloatOps, NumericOps};

use super::{axis_len, cast, finish_variance, MatrixNonZero, MatrixShape, MatrixSum, MatrixVariance};

impl<M> MatrixShape for CsrMatrix<M> {
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }
}

impl<M: NumericOps> MatrixNonZero for CsrMatrix<M> {
    fn nonzero_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign,
    {
        let mut result = vec![T::zero(); self.ncols()];
        for &col_index in self.col_indices() {
            result[col_index] += T::one();
        }
        Ok(result)
    }

    fn nonzero_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign,
    {
        self.row_offsets()
            .windows(2)
            .map(|window| {
                let diff = window[1]
                    .checked_sub(window[0])
                    .ok_or_else(|| anyhow!("Subtraction overflow"))?;
                T::from(diff).ok_or_else(|| anyhow!("Failed to convert to target type"))
            })
            .collect()
    }
}

impl<M: NumericOps> MatrixSum for CsrMatrix<M> {
    type Item = M;

    fn sum_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: FloatOps,
    {
        let mut result = vec![T::zero(); self.ncols()];
        for (&col_index, &value) in self.col_indices().iter().zip(self.values()) {
            result[col_index] += cast::<M, T>(value)?;
        }
        Ok(result)
    }

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: FloatOps,
    {
        let mut result = Vec::with_capacity(self.nrows());
        for row in self.row_iter() {
            let mut sum = T::zero();
            for &value in row.values() {
                sum += cast::<M, T>(value)?;
            }
            result.push(sum);
        }
        Ok(result)
    }
}

impl<M: NumericOps> MatrixVariance for CsrMatrix<M> {
    type Item = M;

    fn mean_var_col<T>(&self) -> anyhow::Result<(Vec<T>, Vec<T>)>
    where
        T: FloatOps,
    {
        let n: T = axis_len(self.nrows())?;
        let means: Vec<T> = self.sum_col::<T>()?.into_iter().map(|s| s / n).collect();
        let nonzero: Vec<usize> = self.nonzero_col()?;

        let mut squared_diffs = vec![T::zero(); self.ncols()];
        for (&col, &value) in self.col_indices().iter().zip(self.values()) {
            let diff = cast::<M, T>(value)? - means[col];
            squared_diffs[col] += diff * diff;
        }

        finish_variance(&mut squared_diffs, &means, &nonzero, self.nrows())?;
        Ok((means, squared_diffs))
    }

    fn mean_var_row<T>(&self) -> anyhow::Result<(Vec<T>, Vec<T>)>
    where
        T: FloatOps,
    {
        let n: T = axis_len(self.ncols())?;
        let means: Vec<T> = self.sum_row::<T>()?.into_iter().map(|s| s / n).collect();
        let nonzero: Vec<usize> = self.nonzero_row()?;

        let mut squared_diffs = vec![T::zero(); self.nrows()];
        for (row_idx, row) in self.row_iter().enumerate() {
            let mean = means[row_idx];
            for &value in row.values() {
                let diff = cast::<M, T>(value)? - mean;
                squared_diffs[row_idx] += diff * diff;
            }
        }

        finish_variance(&mut squared_diffs, &means, &nonzero, self.ncols())?;
        Ok((means, squared_diffs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::{CooMatrix, CscMatrix};

    fn create_test_matrix() -> CsrMatrix<f64> {
        // Create a 4x3 sparse matrix with the following structure:
        // [1 0 2]
        // [0 0 0]
        // [3 4 0]
        // [0 5 6]
        let mut coo = CooMatrix::new(4, 3);
        coo.push(0, 0, 1.0);
        coo.push(2, 0, 3.0);
        coo.push(2, 1, 4.0);
        coo.push(3, 1, 5.0);
        coo.push(0, 2, 2.0);
        coo.push(3, 2, 6.0);

        CsrMatrix::from(&coo)
    }

    #[test]
    fn test_nonzero_row() {
        let matrix = create_test_matrix();
        let result: Vec<u32> = matrix.nonzero_row().unwrap();
        assert_eq!(result, vec![2, 0, 2, 2]);
    }

    #[test]
    fn test_nonzero_col() {
        let matrix = create_test_matrix();
        let result: Vec<u64> = matrix.nonzero_col().unwrap();
        assert_eq!(result, vec![2, 2, 2]);
    }

    #[test]
    fn test_zero_matrix() {
        let matrix: CsrMatrix<f64> = CsrMatrix::zeros(5, 4);

        let col_result: Vec<u32> = matrix.nonzero_col().unwrap();
        assert_eq!(col_result, vec![0, 0, 0, 0]);

        let (means, vars): (Vec<f64>, Vec<f64>) = matrix.mean_var_row().unwrap();
        assert!(means.iter().all(|&m| m == 0.0));
        assert!(vars.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_matches_csc_statistics() {
        let csr = create_test_matrix();
        let csc = CscMatrix::from(&csr);

        let (csr_means, csr_vars): (Vec<f64>, Vec<f64>) = csr.mean_var_row().unwrap();
        let (csc_means, csc_vars): (Vec<f64>, Vec<f64>) = csc.mean_var_row().unwrap();
        for i in 0..csr.nrows() {
            assert_relative_eq!(csr_means[i], csc_means[i], epsilon = 1e-12);
            assert_relative_eq!(csr_vars[i], csc_vars[i], epsilon = 1e-12);
        }

        let (csr_means, csr_vars): (Vec<f64>, Vec<f64>) = csr.mean_var_col().unwrap();
        let (csc_means, csc_vars): (Vec<f64>, Vec<f64>) = csc.mean_var_col().unwrap();
        for j in 0..csr.ncols() {
            assert_relative_eq!(csr_means[j], csc_means[j], epsilon = 1e-12);
            assert_relative_eq!(csr_vars[j], csc_vars[j], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_f32_storage() {
        let coo = CooMatrix::try_from_triplets(2, 2, vec![0, 1], vec![0, 1], vec![2.0f32, 4.0])
            .unwrap();
        let csr: CsrMatrix<f32> = (&coo).into();
        let sums: Vec<f64> = csr.sum_row().unwrap();
        assert_eq!(sums, vec![2.0, 4.0]);
    }
}

use std::ops::AddAssign;

use nalgebra_sparse::CscMatrix;
use num_traits::{PrimInt, Unsigned, Zero};

use crate::{FloatOps, NumericOps};

use anyhow::anyhow;

use super::{
    axis_len, cast, finish_variance, MatrixNonZero, MatrixSelect, MatrixShape, MatrixSum,
    MatrixVariance,
};

impl<M> MatrixShape for CscMatrix<M> {
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }
}

impl<M: NumericOps> MatrixNonZero for CscMatrix<M> {
    fn nonzero_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign,
    {
        self.col_offsets()
            .windows(2)
            .map(|window| {
                let diff = window[1]
                    .checked_sub(window[0])
                    .ok_or_else(|| anyhow!("Subtraction overflow"))?;
                T::from(diff).ok_or_else(|| anyhow!("Failed to convert to target type"))
            })
            .collect()
    }

    fn nonzero_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign,
    {
        let mut result = vec![T::zero(); self.nrows()];
        for &row_index in self.row_indices() {
            result[row_index] += T::one();
        }
        Ok(result)
    }
}

impl<M: NumericOps> MatrixSum for CscMatrix<M> {
    type Item = M;

    fn sum_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: FloatOps,
    {
        let mut result = Vec::with_capacity(self.ncols());
        for col in self.col_iter() {
            let mut sum = T::zero();
            for &value in col.values() {
                sum += cast::<M, T>(value)?;
            }
            result.push(sum);
        }
        Ok(result)
    }

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: FloatOps,
    {
        let mut result = vec![T::zero(); self.nrows()];
        for (&row, &value) in self.row_indices().iter().zip(self.values()) {
            result[row] += cast::<M, T>(value)?;
        }
        Ok(result)
    }
}

impl<M: NumericOps> MatrixVariance for CscMatrix<M> {
    type Item = M;

    fn mean_var_col<T>(&self) -> anyhow::Result<(Vec<T>, Vec<T>)>
    where
        T: FloatOps,
    {
        let n: T = axis_len(self.nrows())?;
        let means: Vec<T> = self.sum_col::<T>()?.into_iter().map(|s| s / n).collect();
        let nonzero: Vec<usize> = self.nonzero_col()?;

        let mut squared_diffs = vec![T::zero(); self.ncols()];
        for (col_idx, col) in self.col_iter().enumerate() {
            let mean = means[col_idx];
            for &value in col.values() {
                let diff = cast::<M, T>(value)? - mean;
                squared_diffs[col_idx] += diff * diff;
            }
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

        // Rows are scattered across columns, so accumulate in a second pass
        let mut squared_diffs = vec![T::zero(); self.nrows()];
        for (&row, &value) in self.row_indices().iter().zip(self.values()) {
            let diff = cast::<M, T>(value)? - means[row];
            squared_diffs[row] += diff * diff;
        }

        finish_variance(&mut squared_diffs, &means, &nonzero, self.ncols())?;
        Ok((means, squared_diffs))
    }
}

impl<M: NumericOps> MatrixSelect for CscMatrix<M> {
    fn select_rows(&self, rows: &[usize]) -> anyhow::Result<Self> {
        let mut new_index = vec![None; self.nrows()];
        for (new_row, &old_row) in rows.iter().enumerate() {
            let nrows = self.nrows();
            let slot = new_index
                .get_mut(old_row)
                .ok_or_else(|| anyhow!("Row index {} out of bounds ({} rows)", old_row, nrows))?;
            if slot.is_some() {
                return Err(anyhow!("Row index {} selected more than once", old_row));
            }
            *slot = Some(new_row);
        }

        let mut col_offsets = Vec::with_capacity(self.ncols() + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        let mut entries: Vec<(usize, M)> = Vec::new();
        col_offsets.push(0);

        for col in self.col_iter() {
            entries.clear();
            entries.extend(
                col.row_indices()
                    .iter()
                    .zip(col.values())
                    .filter_map(|(&row, &value)| new_index[row].map(|new_row| (new_row, value))),
            );
            // Selection order may differ from storage order
            entries.sort_unstable_by_key(|&(row, _)| row);
            for &(row, value) in &entries {
                row_indices.push(row);
                values.push(value);
            }
            col_offsets.push(row_indices.len());
        }

        CscMatrix::try_from_csc_data(rows.len(), self.ncols(), col_offsets, row_indices, values)
            .map_err(|e| anyhow!("Failed to build row selection: {}", e))
    }

    fn select_cols(&self, cols: &[usize]) -> anyhow::Result<Self> {
        let mut col_offsets = Vec::with_capacity(cols.len() + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        col_offsets.push(0);

        for &col_idx in cols {
            if col_idx >= self.ncols() {
                return Err(anyhow!(
                    "Column index {} out of bounds ({} columns)",
                    col_idx,
                    self.ncols()
                ));
            }
            let col = self.col(col_idx);
            row_indices.extend_from_slice(col.row_indices());
            values.extend_from_slice(col.values());
            col_offsets.push(row_indices.len());
        }

        CscMatrix::try_from_csc_data(self.nrows(), cols.len(), col_offsets, row_indices, values)
            .map_err(|e| anyhow!("Failed to build column selection: {}", e))
    }
}

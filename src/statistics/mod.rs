//! # Mean-Variance Statistics
//!
//! Per-gene dispersion summaries for a genes × cells expression matrix. The log-scale
//! values of the expressed genes feed the noise trend fit in [`crate::filter`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubpopError};
use crate::sparse::{MatrixNonZero, MatrixShape, MatrixVariance};

pub mod regression;

pub use regression::{linregress, LinearFit};

/// Default fraction of cells a gene must be present in to take part in the trend fit.
pub const DEFAULT_MIN_PRESENCE_FRACTION: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanVarianceConfig {
    /// A gene is kept when its presence count is strictly greater than
    /// `min_presence_fraction * n_cells`.
    pub min_presence_fraction: f64,
}

impl Default for MeanVarianceConfig {
    fn default() -> Self {
        Self {
            min_presence_fraction: DEFAULT_MIN_PRESENCE_FRACTION,
        }
    }
}

/// Per-gene statistics. All vectors indexed by gene hold one entry per matrix row;
/// `log_means` and `log_cvs` are aligned with `nonzero_indices`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneStatistics {
    pub n_cells: usize,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    pub stds: Vec<f64>,
    pub cvs: Vec<f64>,
    pub presence: Vec<usize>,
    pub nonzero_indices: Vec<usize>,
    pub log_means: Vec<f64>,
    pub log_cvs: Vec<f64>,
}

impl GeneStatistics {
    pub fn n_genes(&self) -> usize {
        self.means.len()
    }

    /// Number of genes taking part in the noise trend fit.
    pub fn n_expressed(&self) -> usize {
        self.nonzero_indices.len()
    }
}

/// Computes mean, variance, coefficient of variation and presence for every gene (row).
///
/// The coefficient of variation is `std / mean`, and exactly `0.0` where the mean is zero.
/// Genes with a nonzero mean, a presence above the configured fraction of cells and a
/// positive coefficient of variation form the nonzero index set, for which log10 mean
/// and log10 CV are reported.
pub fn mean_variance<M>(matrix: &M, config: &MeanVarianceConfig) -> Result<GeneStatistics>
where
    M: MatrixShape + MatrixNonZero + MatrixVariance,
{
    let (n_genes, n_cells) = matrix.shape();
    if n_genes == 0 || n_cells == 0 {
        return Err(SubpopError::input(format!(
            "expression matrix must have at least one gene and one cell, got {} x {}",
            n_genes, n_cells
        )));
    }
    let fraction = config.min_presence_fraction;
    if !fraction.is_finite() || !(0.0..1.0).contains(&fraction) {
        return Err(SubpopError::config(
            "min_presence_fraction",
            format!("must lie in [0, 1), got {}", fraction),
        ));
    }

    let (means, variances): (Vec<f64>, Vec<f64>) = matrix.mean_var_row()?;
    let presence: Vec<usize> = matrix.nonzero_row()?;

    let stds: Vec<f64> = variances.iter().map(|&v| v.max(0.0).sqrt()).collect();
    let cvs: Vec<f64> = stds
        .iter()
        .zip(&means)
        .map(|(&std, &mean)| if mean != 0.0 { std / mean } else { 0.0 })
        .collect();

    let min_presence = n_cells as f64 * fraction;
    let nonzero_indices: Vec<usize> = (0..n_genes)
        .filter(|&g| means[g] != 0.0 && presence[g] as f64 > min_presence && cvs[g] > 0.0)
        .collect();

    let log_means = nonzero_indices.iter().map(|&g| means[g].log10()).collect();
    let log_cvs = nonzero_indices.iter().map(|&g| cvs[g].log10()).collect();

    log::debug!(
        "Gene statistics: {} genes x {} cells, {} expressed above {:.4}% presence",
        n_genes,
        n_cells,
        nonzero_indices.len(),
        fraction * 100.0
    );

    Ok(GeneStatistics {
        n_cells,
        means,
        variances,
        stds,
        cvs,
        presence,
        nonzero_indices,
        log_means,
        log_cvs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};

    fn coo_from_rows(rows: &[&[f64]]) -> CooMatrix<f64> {
        let ncols = rows[0].len();
        let mut coo = CooMatrix::new(rows.len(), ncols);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    coo.push(i, j, v);
                }
            }
        }
        coo
    }

    #[test]
    fn test_zero_rows_have_zero_cv() {
        let coo = coo_from_rows(&[&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]]);
        let matrix = CscMatrix::from(&coo);
        let stats = mean_variance(&matrix, &MeanVarianceConfig::default()).unwrap();

        assert_eq!(stats.cvs[0], 0.0);
        assert!(!stats.cvs[0].is_nan());
        assert_eq!(stats.presence, vec![0, 3]);
        assert_eq!(stats.nonzero_indices, vec![1]);
    }

    #[test]
    fn test_values() {
        let coo = coo_from_rows(&[&[0.0, 2.0, 0.0, 2.0]]);
        let matrix = CscMatrix::from(&coo);
        let stats = mean_variance(&matrix, &MeanVarianceConfig::default()).unwrap();

        assert_relative_eq!(stats.means[0], 1.0);
        assert_relative_eq!(stats.variances[0], 1.0);
        assert_relative_eq!(stats.stds[0], 1.0);
        assert_relative_eq!(stats.cvs[0], 1.0);
        assert_relative_eq!(stats.log_means[0], 0.0);
        assert_relative_eq!(stats.log_cvs[0], 0.0);
    }

    #[test]
    fn test_presence_threshold() {
        // Gene 0 appears in one of four cells
        let coo = coo_from_rows(&[&[5.0, 0.0, 0.0, 0.0], &[1.0, 2.0, 1.0, 2.0]]);
        let matrix = CscMatrix::from(&coo);

        let strict = MeanVarianceConfig {
            min_presence_fraction: 0.25,
        };
        let stats = mean_variance(&matrix, &strict).unwrap();
        assert_eq!(stats.nonzero_indices, vec![1]);

        let stats = mean_variance(&matrix, &MeanVarianceConfig::default()).unwrap();
        assert_eq!(stats.nonzero_indices, vec![0, 1]);
    }

    #[test]
    fn test_constant_expression_excluded_from_trend() {
        let coo = coo_from_rows(&[&[3.0, 3.0, 3.0], &[1.0, 0.0, 2.0]]);
        let matrix = CscMatrix::from(&coo);
        let stats = mean_variance(&matrix, &MeanVarianceConfig::default()).unwrap();

        assert_eq!(stats.cvs[0], 0.0);
        assert_eq!(stats.nonzero_indices, vec![1]);
        assert!(stats.log_cvs.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_csr_and_csc_agree() {
        let coo = coo_from_rows(&[&[0.0, 1.0, 4.0, 0.0], &[2.0, 0.0, 0.0, 7.0], &[0.0; 4]]);
        let csc = CscMatrix::from(&coo);
        let csr = CsrMatrix::from(&coo);
        let config = MeanVarianceConfig::default();

        let a = mean_variance(&csc, &config).unwrap();
        let b = mean_variance(&csr, &config).unwrap();
        assert_eq!(a.nonzero_indices, b.nonzero_indices);
        for (x, y) in a.log_cvs.iter().zip(&b.log_cvs) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_empty_matrix_is_input_error() {
        let no_cells: CscMatrix<f64> = CscMatrix::zeros(4, 0);
        let no_genes: CscMatrix<f64> = CscMatrix::zeros(0, 4);
        let config = MeanVarianceConfig::default();

        assert!(matches!(
            mean_variance(&no_cells, &config),
            Err(SubpopError::Input(_))
        ));
        assert!(matches!(
            mean_variance(&no_genes, &config),
            Err(SubpopError::Input(_))
        ));
    }

    #[test]
    fn test_invalid_presence_fraction() {
        let coo = coo_from_rows(&[&[1.0, 2.0]]);
        let matrix = CscMatrix::from(&coo);
        let config = MeanVarianceConfig {
            min_presence_fraction: 1.5,
        };
        let err = mean_variance(&matrix, &config).unwrap_err();
        assert!(err.is_configuration());
    }
}

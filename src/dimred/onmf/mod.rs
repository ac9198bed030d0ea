//! # Orthogonal Nonnegative Matrix Factorization
//!
//! Factorizes a nonnegative genes × cells matrix `X ≈ A S` with an orthogonality
//! promoting multiplicative update for the basis `A` (genes × k) and the standard
//! update for the coefficients `S` (k × cells):
//!
//! - `A ← A ⊙ sqrt((X Sᵀ) ⊘ (A Aᵀ X Sᵀ))`
//! - `S ← S ⊙ (Aᵀ X) ⊘ (Aᵀ A S)`
//!
//! After the iterations the basis columns are rescaled to unit norm and the
//! coefficients are re-solved per cell with nonnegative least squares, using the
//! gene-filtered expression of each cell as the target.

use nalgebra_sparse::CscMatrix;
use ndarray::{Array1, Array2, Axis, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dense::normalize_columns_l2;
use crate::error::{Degeneracy, Result, SubpopError};
use crate::filter::FilteredMatrix;

pub mod nnls;

pub use nnls::NnlsSolver;

const UPDATE_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnmfConfig {
    pub max_iter: usize,
    /// Converged once the relative reconstruction error drops below this value.
    pub residual: f64,
    /// Converged once the relative error changes by less than this between iterations.
    pub tof: f64,
    pub seed: u64,
}

impl Default for OnmfConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            residual: 1e-4,
            tof: 1e-4,
            seed: 0,
        }
    }
}

impl OnmfConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(SubpopError::config("max_iter", "must be at least 1"));
        }
        if !(self.residual.is_finite() && self.residual >= 0.0) {
            return Err(SubpopError::config(
                "residual",
                format!("must be a nonnegative finite number, got {}", self.residual),
            ));
        }
        if !(self.tof.is_finite() && self.tof >= 0.0) {
            return Err(SubpopError::config(
                "tof",
                format!("must be a nonnegative finite number, got {}", self.tof),
            ));
        }
        Ok(())
    }
}

/// Builder for [`OnmfConfig`].
///
/// ```ignore
/// let config = OnmfBuilder::new().max_iter(1000).residual(1e-5).seed(7).build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct OnmfBuilder {
    config: OnmfConfig,
}

impl OnmfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.config.max_iter = max_iter;
        self
    }

    pub fn residual(mut self, residual: f64) -> Self {
        self.config.residual = residual;
        self
    }

    pub fn tof(mut self, tof: f64) -> Self {
        self.config.tof = tof;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn build(self) -> OnmfConfig {
        self.config
    }
}

/// Raw output of the multiplicative updates.
#[derive(Debug, Clone)]
pub struct Factorization {
    /// genes × k
    pub basis: Array2<f64>,
    /// k × cells
    pub coefficients: Array2<f64>,
    pub iterations: usize,
    pub relative_error: f64,
    pub converged: bool,
}

impl Factorization {
    pub fn degeneracy(&self) -> Option<Degeneracy> {
        (!self.converged).then_some(Degeneracy::FactorizationNotConverged {
            iterations: self.iterations,
            relative_error: self.relative_error,
        })
    }
}

/// Runs the orthogonal NMF updates on `x` (genes × cells) with `k` features.
///
/// Hitting `max_iter` is not an error: the last iterate is returned with
/// `converged == false`.
pub fn factorize(x: &CscMatrix<f64>, k: usize, config: &OnmfConfig) -> Result<Factorization> {
    config.validate()?;
    let (n_genes, n_cells) = (x.nrows(), x.ncols());
    if k == 0 || k > n_genes.min(n_cells) {
        return Err(SubpopError::config(
            "nfeats",
            format!(
                "must be between 1 and min(genes, cells) = {}, got {}",
                n_genes.min(n_cells),
                k
            ),
        ));
    }
    if x.values().iter().any(|&v| v < 0.0 || !v.is_finite()) {
        return Err(SubpopError::input(
            "factorization requires finite nonnegative expression values",
        ));
    }
    let x_norm_sq: f64 = x.values().iter().map(|v| v * v).sum();
    if x_norm_sq == 0.0 {
        return Err(SubpopError::input("cannot factorize an all-zero matrix"));
    }
    let x_norm = x_norm_sq.sqrt();

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mean = x.values().iter().sum::<f64>() / (n_genes * n_cells) as f64;
    let scale = (mean / k as f64).sqrt();
    let mut a = Array2::from_shape_fn((n_genes, k), |_| scale * rng.random_range(0.01..2.0));
    let mut s = Array2::from_shape_fn((k, n_cells), |_| scale * rng.random_range(0.01..2.0));

    let mut previous_error = f64::INFINITY;
    let mut relative_error = f64::INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iter {
        iterations += 1;

        let xst = sparse_dot_dense_t(x, &s);
        let denominator = a.dot(&a.t().dot(&xst));
        Zip::from(&mut a)
            .and(&xst)
            .and(&denominator)
            .for_each(|v, &num, &den| *v *= (num / (den + UPDATE_EPS)).sqrt());

        let atx = dense_t_dot_sparse(&a, x);
        let ata = a.t().dot(&a);
        let denominator = ata.dot(&s);
        Zip::from(&mut s)
            .and(&atx)
            .and(&denominator)
            .for_each(|v, &num, &den| *v *= num / (den + UPDATE_EPS));

        // ||X - AS||^2 = ||X||^2 - 2 <S, AᵀX> + <AᵀA, SSᵀ>
        let cross: f64 = (&s * &atx).sum();
        let gram: f64 = (&ata * &s.dot(&s.t())).sum();
        relative_error = (x_norm_sq - 2.0 * cross + gram).max(0.0).sqrt() / x_norm;

        if iterations % 50 == 0 {
            log::debug!(
                "oNMF iteration {}: relative error {:.6e}",
                iterations,
                relative_error
            );
        }

        if relative_error < config.residual || (previous_error - relative_error).abs() < config.tof
        {
            converged = true;
            break;
        }
        previous_error = relative_error;
    }

    let factorization = Factorization {
        basis: a,
        coefficients: s,
        iterations,
        relative_error,
        converged,
    };
    match factorization.degeneracy() {
        Some(warning) => log::warn!("{}", warning),
        None => log::debug!(
            "oNMF converged after {} iterations (relative error {:.6e})",
            iterations,
            relative_error
        ),
    }
    Ok(factorization)
}

/// Rescaled basis and per-cell coefficients.
#[derive(Debug, Clone)]
pub struct OnmfFactors {
    /// genes × k, every nonzero column of unit Euclidean norm.
    pub basis: Array2<f64>,
    /// k × cells, nonnegative least squares fits of the filtered expression.
    pub coefficients: Array2<f64>,
    pub iterations: usize,
    pub relative_error: f64,
    pub converged: bool,
}

impl OnmfFactors {
    /// Cells × k coordinates.
    pub fn embedding(&self) -> Array2<f64> {
        self.coefficients.t().to_owned()
    }
}

/// Factorizes the full matrix, rescales the basis to unit-norm columns and re-solves
/// the coefficients of every cell against the filtered expression.
///
/// The filtered column of a cell only covers the retained genes; as the target it is
/// placed back into full gene space with zeros for genes that did not pass the filter.
pub fn onmf(
    x: &CscMatrix<f64>,
    filtered: &FilteredMatrix,
    k: usize,
    config: &OnmfConfig,
) -> Result<OnmfFactors> {
    if filtered.n_cells() != x.ncols() {
        return Err(SubpopError::input(format!(
            "filtered matrix has {} cells, full matrix has {}",
            filtered.n_cells(),
            x.ncols()
        )));
    }
    if filtered.gene_indices.iter().any(|&g| g >= x.nrows()) {
        return Err(SubpopError::input(
            "filtered gene indices exceed the full matrix gene count",
        ));
    }

    let fit = factorize(x, k, config)?;
    let mut basis = fit.basis;
    normalize_columns_l2(&mut basis)?;

    let coefficients = resolve_coefficients(&basis, filtered)?;

    Ok(OnmfFactors {
        basis,
        coefficients,
        iterations: fit.iterations,
        relative_error: fit.relative_error,
        converged: fit.converged,
    })
}

/// Per-cell NNLS against `basis`, solved in parallel and assembled in cell order.
fn resolve_coefficients(basis: &Array2<f64>, filtered: &FilteredMatrix) -> Result<Array2<f64>> {
    let solver = NnlsSolver::new(basis.view());
    let k = basis.ncols();
    let gene_indices = &filtered.gene_indices;

    let columns: Vec<Array1<f64>> = (0..filtered.n_cells())
        .into_par_iter()
        .map(|cell| {
            let col = filtered.matrix.col(cell);
            let mut atb = Array1::<f64>::zeros(k);
            for (&row, &value) in col.row_indices().iter().zip(col.values()) {
                atb.scaled_add(value, &basis.row(gene_indices[row]));
            }
            solver.solve(atb.view())
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| SubpopError::Numerical(e.to_string()))?;

    let mut coefficients = Array2::zeros((k, filtered.n_cells()));
    for (mut target, column) in coefficients.axis_iter_mut(Axis(1)).zip(&columns) {
        target.assign(column);
    }
    Ok(coefficients)
}

/// `X Sᵀ` for sparse `X` (genes × cells) and dense `S` (k × cells).
fn sparse_dot_dense_t(x: &CscMatrix<f64>, s: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((x.nrows(), s.nrows()));
    for (cell, col) in x.col_iter().enumerate() {
        let s_col = s.column(cell);
        for (&gene, &value) in col.row_indices().iter().zip(col.values()) {
            out.row_mut(gene).scaled_add(value, &s_col);
        }
    }
    out
}

/// `Aᵀ X` for dense `A` (genes × k) and sparse `X` (genes × cells).
fn dense_t_dot_sparse(a: &Array2<f64>, x: &CscMatrix<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((a.ncols(), x.ncols()));
    for (cell, col) in x.col_iter().enumerate() {
        let mut target = out.column_mut(cell);
        for (&gene, &value) in col.row_indices().iter().zip(col.values()) {
            target.scaled_add(value, &a.row(gene));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::column_norms;
    use crate::filter::{filter_genes, NoiseFilterConfig};
    use crate::statistics::{mean_variance, MeanVarianceConfig};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use nalgebra_sparse::CooMatrix;
    use nshare::IntoNdarray2;

    /// Two cell groups expressing disjoint gene programs.
    fn two_program_matrix(n_genes: usize, n_cells: usize, seed: u64) -> CscMatrix<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut coo = CooMatrix::new(n_genes, n_cells);
        for c in 0..n_cells {
            let program = c % 2;
            for g in 0..n_genes {
                let in_program = g % 2 == program;
                let value = if in_program {
                    rng.random_range(2.0..6.0)
                } else if rng.random::<f64>() < 0.1 {
                    rng.random_range(0.1..0.5)
                } else {
                    0.0
                };
                if value != 0.0 {
                    coo.push(g, c, value);
                }
            }
        }
        CscMatrix::from(&coo)
    }

    fn all_genes(x: &CscMatrix<f64>) -> FilteredMatrix {
        FilteredMatrix {
            gene_indices: (0..x.nrows()).collect(),
            matrix: x.clone(),
            line: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_products_match_dense() {
        let x = two_program_matrix(6, 5, 1);
        let dense_x = DMatrix::from(&x).into_ndarray2().into_owned();
        let s = Array2::from_shape_fn((3, 5), |(i, j)| (i + 2 * j) as f64 * 0.5);
        let a = Array2::from_shape_fn((6, 3), |(i, j)| (i * j) as f64 + 1.0);

        let xst = sparse_dot_dense_t(&x, &s);
        let expected = dense_x.dot(&s.t());
        for (p, q) in xst.iter().zip(expected.iter()) {
            assert_relative_eq!(p, q, epsilon = 1e-10);
        }

        let atx = dense_t_dot_sparse(&a, &x);
        let expected = a.t().dot(&dense_x);
        for (p, q) in atx.iter().zip(expected.iter()) {
            assert_relative_eq!(p, q, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_factorization_reduces_error_and_stays_nonnegative() {
        let x = two_program_matrix(20, 40, 3);
        let config = OnmfBuilder::new().max_iter(300).tof(0.0).residual(0.0).build();
        let fit = factorize(&x, 2, &config).unwrap();

        assert_eq!(fit.basis.dim(), (20, 2));
        assert_eq!(fit.coefficients.dim(), (2, 40));
        assert!(fit.basis.iter().all(|&v| v >= 0.0));
        assert!(fit.coefficients.iter().all(|&v| v >= 0.0));
        assert!(fit.relative_error < 0.5);
        // Zero tolerances never trigger, so the cap is reached
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 300);
        assert!(matches!(
            fit.degeneracy(),
            Some(Degeneracy::FactorizationNotConverged { iterations: 300, .. })
        ));
    }

    #[test]
    fn test_factorization_converges_with_defaults() {
        let x = two_program_matrix(20, 40, 5);
        let fit = factorize(&x, 2, &OnmfConfig::default()).unwrap();
        assert!(fit.converged);
        assert!(fit.iterations < 500);
        assert!(fit.degeneracy().is_none());
    }

    #[test]
    fn test_factorization_is_seeded() {
        let x = two_program_matrix(10, 12, 9);
        let config = OnmfBuilder::new().seed(42).build();
        let a = factorize(&x, 2, &config).unwrap();
        let b = factorize(&x, 2, &config).unwrap();
        assert_eq!(a.basis, b.basis);
        assert_eq!(a.coefficients, b.coefficients);
    }

    #[test]
    fn test_basis_columns_have_unit_norm() {
        let x = two_program_matrix(16, 30, 11);
        let factors = onmf(&x, &all_genes(&x), 3, &OnmfConfig::default()).unwrap();

        for norm in column_norms(factors.basis.view()).iter() {
            assert_relative_eq!(*norm, 1.0, epsilon = 1e-6);
        }
        assert!(factors.coefficients.iter().all(|&v| v >= 0.0));
        assert_eq!(factors.embedding().dim(), (30, 3));
    }

    #[test]
    fn test_coefficients_follow_filtered_genes() {
        let x = two_program_matrix(24, 60, 13);
        let stats = mean_variance(&x, &MeanVarianceConfig::default()).unwrap();
        let filtered = filter_genes(&stats, &x, &NoiseFilterConfig { offset: 1.0 }).unwrap();
        assert!(!filtered.is_empty());

        let factors = onmf(&x, &filtered, 2, &OnmfConfig::default()).unwrap();
        assert_eq!(factors.coefficients.dim(), (2, 60));

        // Every coefficient column is the NNLS fit of the scattered filtered column
        let solver = NnlsSolver::new(factors.basis.view());
        let dense_filtered = DMatrix::from(&filtered.matrix).into_ndarray2().into_owned();
        for cell in [0, 1, 17] {
            let mut target = Array1::<f64>::zeros(x.nrows());
            for (r, &g) in filtered.gene_indices.iter().enumerate() {
                target[g] = dense_filtered[[r, cell]];
            }
            let expected = solver
                .solve(factors.basis.t().dot(&target).view())
                .unwrap();
            for j in 0..2 {
                assert_relative_eq!(factors.coefficients[[j, cell]], expected[j], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_invalid_feature_count() {
        let x = two_program_matrix(4, 6, 2);
        for k in [0, 5] {
            let err = factorize(&x, k, &OnmfConfig::default()).unwrap_err();
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_all_zero_matrix() {
        let x: CscMatrix<f64> = CscMatrix::zeros(4, 4);
        assert!(matches!(
            factorize(&x, 2, &OnmfConfig::default()),
            Err(SubpopError::Input(_))
        ));
    }
}

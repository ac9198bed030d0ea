//! # Sparse Principal Component Analysis
//!
//! PCA over a sparse cells × genes CSR matrix using a seeded randomized SVD. Centring
//! happens inside the decomposition, so the expression matrix is never densified.

use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use ndarray::{s, Array1, Array2, Axis};
use nshare::{IntoNalgebra, IntoNdarray2};
use rayon::prelude::*;
use single_svdlib::randomized::{randomized_svd, svd_flip, PowerIterationNormalizer};

use crate::sparse::MatrixVariance;

/// Randomized PCA for sparse CSR matrices (samples × features).
pub struct SparsePCA {
    n_components: usize,
    center: bool,
    n_oversamples: usize,
    n_power_iterations: usize,
    normalizer: PowerIterationNormalizer,
    seed: u64,
    components: Option<Array2<f64>>,
    mean: Option<Array1<f64>>,
    explained_variance: Option<Array1<f64>>,
    explained_variance_ratio: Option<Array1<f64>>,
    total_variance: Option<f64>,
}

impl SparsePCA {
    /// Fits components on `x`.
    ///
    /// The total variance comes from the column moments of `x`, so the explained
    /// variance ratio is relative to every direction, not only the computed ones.
    pub fn fit(&mut self, x: &CsrMatrix<f64>) -> anyhow::Result<()> {
        let (n_samples, n_features) = (x.nrows(), x.ncols());
        if n_samples == 0 || n_features == 0 {
            return Err(anyhow!(
                "PCA needs a non-empty matrix, got {} x {}",
                n_samples,
                n_features
            ));
        }
        let n_components = self.n_components;
        if n_components == 0 || n_components > n_samples.min(n_features) {
            return Err(anyhow!(
                "Requested {} components from a {} x {} matrix",
                n_components,
                n_samples,
                n_features
            ));
        }

        let (means, variances) = x.mean_var_col::<f64>()?;
        let n = n_samples as f64;
        let dof = n_samples.saturating_sub(1).max(1) as f64;
        // Population moments rescaled to the n - 1 denominator of the eigenvalues
        let total_variance = if self.center {
            variances.iter().sum::<f64>() * n / dof
        } else {
            variances
                .iter()
                .zip(&means)
                .map(|(&var, &mean)| var + mean * mean)
                .sum::<f64>()
                * n
                / dof
        };

        let mut res = randomized_svd(
            x,
            n_components,
            self.n_oversamples,
            self.n_power_iterations,
            self.normalizer,
            self.center,
            Some(self.seed),
            false,
        )
        .map_err(|e| anyhow!("Randomized SVD computation failed: {}", e))?;

        let mut u = res.u.into_nalgebra();
        let mut vt = res.vt.into_nalgebra();
        svd_flip(Some(&mut u), Some(&mut vt), false)?;
        res.u = u.into_ndarray2().into_owned();
        res.vt = vt.into_ndarray2().into_owned();

        if res.s.len() < n_components || res.vt.nrows() < n_components {
            return Err(anyhow!(
                "SVD returned {} singular values, {} components requested",
                res.s.len(),
                n_components
            ));
        }

        let components = res.vt.slice(s![..n_components, ..]).to_owned();
        let explained_variance = res.s.slice(s![..n_components]).mapv(|v| v * v / dof);
        let explained_variance_ratio = if total_variance > 0.0 {
            &explained_variance / total_variance
        } else {
            Array1::zeros(n_components)
        };

        log::debug!(
            "Randomized PCA: {} samples x {} features reduced to {} components \
             ({} oversamples, {} power iterations, {:.2}% variance)",
            n_samples,
            n_features,
            n_components,
            self.n_oversamples,
            self.n_power_iterations,
            explained_variance_ratio.sum() * 100.0
        );

        self.components = Some(components);
        self.mean = self.center.then(|| Array1::from(means));
        self.explained_variance = Some(explained_variance);
        self.explained_variance_ratio = Some(explained_variance_ratio);
        self.total_variance = Some(total_variance);

        Ok(())
    }

    /// Projects `x` onto the fitted components without densifying it.
    pub fn transform(&self, x: &CsrMatrix<f64>) -> anyhow::Result<Array2<f64>> {
        let components = self
            .components
            .as_ref()
            .ok_or_else(|| anyhow!("PCA has not been fitted yet"))?;
        if x.ncols() != components.ncols() {
            return Err(anyhow!(
                "Expected {} features, got {}",
                components.ncols(),
                x.ncols()
            ));
        }

        // (x - 1 mean^T) V^T = x V^T - 1 (V mean)^T
        let shift = self.mean.as_ref().map(|mean| components.dot(mean));

        let mut scores = Array2::zeros((x.nrows(), components.nrows()));
        scores
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut score)| {
                let row = x.row(i);
                for (&feature, &value) in row.col_indices().iter().zip(row.values()) {
                    score.scaled_add(value, &components.column(feature));
                }
                if let Some(shift) = &shift {
                    score -= shift;
                }
            });

        Ok(scores)
    }

    pub fn fit_transform(&mut self, x: &CsrMatrix<f64>) -> anyhow::Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Components as rows (n_components × features).
    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components.as_ref()
    }

    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.explained_variance.as_ref()
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<f64>> {
        self.explained_variance_ratio.as_ref()
    }

    pub fn total_variance(&self) -> Option<f64> {
        self.total_variance
    }
}

pub struct SparsePCABuilder {
    n_components: usize,
    center: bool,
    n_oversamples: usize,
    n_power_iterations: usize,
    normalizer: PowerIterationNormalizer,
    seed: u64,
}

impl SparsePCABuilder {
    /// Defaults: centred, 10 oversamples, 7 power iterations with QR normalization, seed 0.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            center: true,
            n_oversamples: 10,
            n_power_iterations: 7,
            normalizer: PowerIterationNormalizer::QR,
            seed: 0,
        }
    }

    pub fn center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn n_oversamples(mut self, n_oversamples: usize) -> Self {
        self.n_oversamples = n_oversamples;
        self
    }

    pub fn n_power_iterations(mut self, n_power_iterations: usize) -> Self {
        self.n_power_iterations = n_power_iterations;
        self
    }

    pub fn normalizer(mut self, normalizer: PowerIterationNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> SparsePCA {
        SparsePCA {
            n_components: self.n_components,
            center: self.center,
            n_oversamples: self.n_oversamples,
            n_power_iterations: self.n_power_iterations,
            normalizer: self.normalizer,
            seed: self.seed,
            components: None,
            mean: None,
            explained_variance: None,
            explained_variance_ratio: None,
            total_variance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimred::pca::PCABuilder;
    use approx::assert_relative_eq;
    use nalgebra_sparse::CooMatrix;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Cells from three expression programs over `n_genes` genes, with light noise.
    fn program_matrix(n_cells: usize, n_genes: usize, seed: u64) -> CsrMatrix<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut coo = CooMatrix::new(n_cells, n_genes);
        for c in 0..n_cells {
            let program = c % 3;
            for g in 0..n_genes {
                if g % 3 == program {
                    coo.push(c, g, 4.0 + g as f64 * 0.5 + rng.random_range(-0.01..0.01));
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    fn dense(x: &CsrMatrix<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((x.nrows(), x.ncols()));
        for (r, c, &v) in x.triplet_iter() {
            out[[r, c]] = v;
        }
        out
    }

    #[test]
    fn test_matches_exact_pca() {
        let x = program_matrix(40, 12, 3);
        let mut sparse = SparsePCABuilder::new(2).n_oversamples(5).build();
        let sparse_scores = sparse.fit_transform(&x).unwrap();

        let mut exact = PCABuilder::default().n_components(2).build();
        let exact_scores = exact.fit_transform(dense(&x).view()).unwrap();

        let (a, b) = (sparse.explained_variance().unwrap(), exact.explained_variance().unwrap());
        for k in 0..2 {
            assert_relative_eq!(a[k], b[k], max_relative = 1e-6);
        }
        assert_relative_eq!(
            sparse.total_variance().unwrap(),
            exact.total_variance().unwrap(),
            max_relative = 1e-10
        );
        // Components agree up to sign
        for (p, q) in sparse_scores.iter().zip(exact_scores.iter()) {
            assert_relative_eq!(p.abs(), q.abs(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_same_seed_same_scores() {
        let x = program_matrix(30, 15, 8);
        let a = SparsePCABuilder::new(3).seed(4).build().fit_transform(&x).unwrap();
        let b = SparsePCABuilder::new(3).seed(4).build().fit_transform(&x).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_centred_scores_have_zero_mean() {
        let x = program_matrix(30, 15, 1);
        let mut pca = SparsePCABuilder::new(2).n_oversamples(4).build();
        let scores = pca.fit_transform(&x).unwrap();

        let means = scores.mean_axis(Axis(0)).unwrap();
        assert_relative_eq!(means[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(means[1], 0.0, epsilon = 1e-9);

        let ratio = pca.explained_variance_ratio().unwrap();
        assert!(ratio[0] >= ratio[1]);
        assert!(ratio.sum() <= 1.0 + 1e-9);
    }

    #[test]
    fn test_rejects_bad_component_count() {
        let x = program_matrix(6, 4, 0);
        assert!(SparsePCABuilder::new(0).build().fit(&x).is_err());
        assert!(SparsePCABuilder::new(5).build().fit(&x).is_err());
        let pca = SparsePCABuilder::new(2).build();
        assert!(pca.transform(&x).is_err());
    }
}

//! # Principal Component Analysis
//!
//! Two paths over a cells × genes matrix:
//! - [`SparsePCA`]: seeded randomized SVD straight on the sparse matrix, used for
//!   realistic dataset sizes.
//! - [`Pca`]: dense PCA with a pluggable [`SVDImplementation`]; [`ExactSVD`] decomposes
//!   the whole matrix and serves inputs too small for a randomized sketch.

use anyhow::anyhow;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::svd::SVD;

mod sparse;

pub use single_svdlib::randomized::PowerIterationNormalizer;
pub use sparse::{SparsePCA, SparsePCABuilder};

type Decomposition = (Array2<f64>, Array1<f64>, Array2<f64>);

// Trait for SVD implementations
pub trait SVDImplementation: Send + Sync {
    /// Returns `(u, s, vt)` with singular values in descending order.
    fn compute(&self, matrix: ArrayView2<f64>) -> anyhow::Result<Decomposition>;
}

/// Full thin SVD with deterministic sign convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactSVD;

impl SVDImplementation for ExactSVD {
    fn compute(&self, matrix: ArrayView2<f64>) -> anyhow::Result<Decomposition> {
        let svd = SVD::new(matrix)?;
        Ok((svd.u().clone(), svd.s().clone(), svd.vt().clone()))
    }
}

/// SVD backend for [`PcaConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "solver", rename_all = "lowercase")]
pub enum SVDMethod {
    Exact,
    /// Randomized SVD with QR-normalized power iterations, deterministic for a fixed seed.
    Random {
        n_oversamples: usize,
        n_power_iterations: usize,
        seed: u64,
    },
}

impl Default for SVDMethod {
    fn default() -> Self {
        Self::Random {
            n_oversamples: 10,
            n_power_iterations: 7,
            seed: 0,
        }
    }
}

/// Serializable PCA settings used by [`crate::dimred::Reducer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    /// Subtract per-gene means before the decomposition.
    pub center: bool,
    pub svd: SVDMethod,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            center: true,
            svd: SVDMethod::default(),
        }
    }
}

impl PcaConfig {
    /// Backend actually used for `n_components` of a `n_samples` × `n_features` matrix.
    /// A sketch as wide as the smaller dimension spans the whole space, so such inputs
    /// go to the exact decomposition.
    pub fn solver_for(
        &self,
        n_samples: usize,
        n_features: usize,
        n_components: usize,
    ) -> SVDMethod {
        match self.svd {
            SVDMethod::Random { n_oversamples, .. }
                if n_components + n_oversamples >= n_samples.min(n_features) =>
            {
                SVDMethod::Exact
            }
            method => method,
        }
    }
}

pub struct PCABuilder<S: SVDImplementation> {
    n_components: Option<usize>,
    center: bool,
    svd_implementation: Arc<S>,
}

impl Default for PCABuilder<ExactSVD> {
    fn default() -> Self {
        PCABuilder::new(ExactSVD)
    }
}

impl<S: SVDImplementation> PCABuilder<S> {
    pub fn new(svd_implementation: S) -> Self {
        PCABuilder {
            n_components: None,
            center: true,
            svd_implementation: Arc::new(svd_implementation),
        }
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = Some(n_components);
        self
    }

    pub fn center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn build(self) -> Pca<S> {
        Pca {
            n_components: self.n_components,
            center: self.center,
            svd_implementation: self.svd_implementation,
            components: None,
            mean: None,
            explained_variance: None,
            explained_variance_ratio: None,
            total_variance: None,
        }
    }
}

pub struct Pca<S: SVDImplementation> {
    n_components: Option<usize>,
    center: bool,
    svd_implementation: Arc<S>,
    components: Option<Array2<f64>>,
    mean: Option<Array1<f64>>,
    explained_variance: Option<Array1<f64>>,
    explained_variance_ratio: Option<Array1<f64>>,
    total_variance: Option<f64>,
}

impl<S: SVDImplementation> Pca<S> {
    /// Fits components on `x` (samples × features).
    pub fn fit(&mut self, x: ArrayView2<f64>) -> anyhow::Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(anyhow!(
                "PCA needs a non-empty matrix, got {} x {}",
                n_samples,
                n_features
            ));
        }
        let max_components = n_samples.min(n_features);
        let n_components = self.n_components.unwrap_or(max_components);
        if n_components == 0 || n_components > max_components {
            return Err(anyhow!(
                "Requested {} components from a {} x {} matrix",
                n_components,
                n_samples,
                n_features
            ));
        }

        let mean = if self.center {
            Some(
                x.mean_axis(Axis(0))
                    .ok_or_else(|| anyhow!("Failed to compute feature means"))?,
            )
        } else {
            None
        };

        let x_preprocessed = self.preprocess(x, &mean);

        let (_u, s, vt) = self.svd_implementation.compute(x_preprocessed.view())?;
        if s.len() < n_components {
            return Err(anyhow!(
                "SVD returned {} singular values, {} components requested",
                s.len(),
                n_components
            ));
        }

        let components = vt.slice(s![..n_components, ..]).to_owned();

        let dof = n_samples.saturating_sub(1).max(1) as f64;
        let eigenvalues = s.mapv(|x| x * x / dof);
        let total_variance = eigenvalues.sum();
        let explained_variance = eigenvalues.slice(s![..n_components]).to_owned();
        let explained_variance_ratio = if total_variance > 0.0 {
            &explained_variance / total_variance
        } else {
            Array1::zeros(n_components)
        };

        log::debug!(
            "PCA: {} samples x {} features reduced to {} components ({:.2}% variance)",
            n_samples,
            n_features,
            n_components,
            explained_variance_ratio.sum() * 100.0
        );

        self.components = Some(components);
        self.mean = mean;
        self.explained_variance = Some(explained_variance);
        self.explained_variance_ratio = Some(explained_variance_ratio);
        self.total_variance = Some(total_variance);

        Ok(())
    }

    fn preprocess(&self, x: ArrayView2<f64>, mean: &Option<Array1<f64>>) -> Array2<f64> {
        let mut x_preprocessed = x.to_owned();

        if let Some(m) = mean {
            x_preprocessed
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .for_each(|mut row| {
                    row -= m;
                });
        }

        x_preprocessed
    }

    /// Projects `x` (samples × features) onto the fitted components.
    pub fn transform(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
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
        let x_preprocessed = self.preprocess(x, &self.mean);
        Ok(x_preprocessed.dot(&components.t()))
    }

    pub fn fit_transform(&mut self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
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

//! # Dimensionality Reduction
//!
//! Turns an expression matrix into a low-dimensional cell embedding (cells × features).
//!
//! ## Available Reducers
//! - **PCA** ([`pca`]): linear projection of the centred, unfiltered expression of
//!   every cell onto the leading principal axes.
//! - **oNMF** ([`onmf`]): orthogonal nonnegative factorization of the unfiltered matrix,
//!   with coefficients re-solved against the filtered expression of each cell.
//!
//! [`Reducer`] selects between the two and validates the requested feature count
//! against the matrix and the filtered gene set.

use std::fmt;
use std::str::FromStr;

use nalgebra_sparse::CscMatrix;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::dense::transpose_to_dense;
use crate::error::{Degeneracy, Result, SubpopError};
use crate::filter::FilteredMatrix;
use crate::sparse::transpose_to_csr;

pub mod onmf;
pub mod pca;

use onmf::{OnmfConfig, OnmfFactors};
use pca::{ExactSVD, PCABuilder, PcaConfig, SVDMethod, SparsePCABuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    Pca,
    Onmf,
}

impl ReductionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionMethod::Pca => "pca",
            ReductionMethod::Onmf => "onmf",
        }
    }
}

impl fmt::Display for ReductionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReductionMethod {
    type Err = SubpopError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pca" => Ok(ReductionMethod::Pca),
            "onmf" => Ok(ReductionMethod::Onmf),
            other => Err(SubpopError::config(
                "method",
                format!("expected \"pca\" or \"onmf\", got {:?}", other),
            )),
        }
    }
}

/// Reduction strategy with its settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Reducer {
    Pca(PcaConfig),
    Onmf(OnmfConfig),
}

impl Default for Reducer {
    fn default() -> Self {
        Reducer::Pca(PcaConfig::default())
    }
}

impl From<ReductionMethod> for Reducer {
    fn from(method: ReductionMethod) -> Self {
        match method {
            ReductionMethod::Pca => Reducer::Pca(PcaConfig::default()),
            ReductionMethod::Onmf => Reducer::Onmf(OnmfConfig::default()),
        }
    }
}

/// Cell coordinates in the reduced space.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub method: ReductionMethod,
    /// cells × features
    pub coordinates: Array2<f64>,
    /// PCA only: components as rows (features × genes).
    pub components: Option<Array2<f64>>,
    /// PCA only.
    pub explained_variance_ratio: Option<Array1<f64>>,
    /// PCA only: variance over all directions, the denominator of the ratios.
    pub total_variance: Option<f64>,
    /// oNMF only: rescaled basis and per-cell coefficients.
    pub factors: Option<OnmfFactors>,
    pub warnings: Vec<Degeneracy>,
}

impl Embedding {
    pub fn n_cells(&self) -> usize {
        self.coordinates.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.coordinates.ncols()
    }
}

impl Reducer {
    pub fn method(&self) -> ReductionMethod {
        match self {
            Reducer::Pca(_) => ReductionMethod::Pca,
            Reducer::Onmf(_) => ReductionMethod::Onmf,
        }
    }

    /// Embeds every cell of `matrix` (genes × cells) into `nfeats` dimensions.
    ///
    /// `filtered` must come from the same matrix. An empty filtered gene set is rejected
    /// for both strategies, since the noise offset left nothing to analyse.
    pub fn reduce(
        &self,
        matrix: &CscMatrix<f64>,
        filtered: &FilteredMatrix,
        nfeats: usize,
    ) -> Result<Embedding> {
        let (n_genes, n_cells) = (matrix.nrows(), matrix.ncols());
        if filtered.n_cells() != n_cells {
            return Err(SubpopError::input(format!(
                "filtered matrix has {} cells, expression matrix has {}",
                filtered.n_cells(),
                n_cells
            )));
        }
        if filtered.is_empty() {
            return Err(SubpopError::config(
                "offset",
                "no genes passed the noise filter; lower the offset",
            ));
        }
        let max_features = n_genes.min(n_cells);
        if nfeats == 0 || nfeats > max_features {
            return Err(SubpopError::config(
                "nfeats",
                format!(
                    "must be between 1 and {} for a {} x {} matrix, got {}",
                    max_features, n_genes, n_cells, nfeats
                ),
            ));
        }

        log::info!(
            "Reducing {} cells x {} genes to {} features with {}",
            n_cells,
            n_genes,
            nfeats,
            self.method()
        );

        match self {
            Reducer::Pca(config) => pca_embedding(matrix, config, nfeats)
                .map_err(|e| SubpopError::Numerical(e.to_string())),
            Reducer::Onmf(config) => {
                let factors = onmf::onmf(matrix, filtered, nfeats, config)?;
                let warnings = (!factors.converged)
                    .then_some(Degeneracy::FactorizationNotConverged {
                        iterations: factors.iterations,
                        relative_error: factors.relative_error,
                    })
                    .into_iter()
                    .collect();
                Ok(Embedding {
                    method: ReductionMethod::Onmf,
                    coordinates: factors.embedding(),
                    components: None,
                    explained_variance_ratio: None,
                    total_variance: None,
                    factors: Some(factors),
                    warnings,
                })
            }
        }
    }
}

/// PCA of the cells × genes transpose of `matrix`.
fn pca_embedding(
    matrix: &CscMatrix<f64>,
    config: &PcaConfig,
    nfeats: usize,
) -> anyhow::Result<Embedding> {
    let (n_genes, n_cells) = (matrix.nrows(), matrix.ncols());
    let embedding = match config.solver_for(n_cells, n_genes, nfeats) {
        SVDMethod::Exact => {
            let cells_by_genes = transpose_to_dense(matrix);
            let mut pca = PCABuilder::new(ExactSVD)
                .n_components(nfeats)
                .center(config.center)
                .build();
            let coordinates = pca.fit_transform(cells_by_genes.view())?;
            Embedding {
                method: ReductionMethod::Pca,
                coordinates,
                components: pca.components().cloned(),
                explained_variance_ratio: pca.explained_variance_ratio().cloned(),
                total_variance: pca.total_variance(),
                factors: None,
                warnings: Vec::new(),
            }
        }
        SVDMethod::Random {
            n_oversamples,
            n_power_iterations,
            seed,
        } => {
            let cells_by_genes = transpose_to_csr(matrix)?;
            let mut pca = SparsePCABuilder::new(nfeats)
                .center(config.center)
                .n_oversamples(n_oversamples)
                .n_power_iterations(n_power_iterations)
                .seed(seed)
                .build();
            let coordinates = pca.fit_transform(&cells_by_genes)?;
            Embedding {
                method: ReductionMethod::Pca,
                coordinates,
                components: pca.components().cloned(),
                explained_variance_ratio: pca.explained_variance_ratio().cloned(),
                total_variance: pca.total_variance(),
                factors: None,
                warnings: Vec::new(),
            }
        }
    };
    Ok(embedding)
}

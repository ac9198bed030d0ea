//! # Noise-Floor Gene Filter
//!
//! Expression noise of lowly expressed genes follows a predictable dispersion trend:
//! log10 CV falls linearly with log10 mean. Genes lying above that trend, shifted up by
//! `log10(offset)`, carry variability beyond sampling noise and are retained.

use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Degeneracy, Result, SubpopError};
use crate::sparse::MatrixSelect;
use crate::statistics::{linregress, GeneStatistics, LinearFit};

pub const DEFAULT_OFFSET: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseFilterConfig {
    /// Multiplicative widening of the noise band. Values above 1 make the filter stricter.
    pub offset: f64,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self {
            offset: DEFAULT_OFFSET,
        }
    }
}

/// The fitted noise trend together with the intercept shift that was applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseLine {
    pub fit: LinearFit,
    pub offset: f64,
}

impl NoiseLine {
    /// Fits the trend of log10 CV against log10 mean over the expressed genes.
    ///
    /// Returns `Ok(None)` when fewer than two genes are available.
    pub fn fit(stats: &GeneStatistics, offset: f64) -> Result<Option<Self>> {
        validate_offset(offset)?;
        if stats.n_expressed() < 2 {
            return Ok(None);
        }
        let fit = linregress(&stats.log_means, &stats.log_cvs)?;
        Ok(Some(NoiseLine { fit, offset }))
    }

    pub fn slope(&self) -> f64 {
        self.fit.slope
    }

    /// Intercept after the `log10(offset)` shift.
    pub fn intercept(&self) -> f64 {
        self.fit.intercept + self.offset.log10()
    }

    /// Noise-floor log10 CV at the given log10 mean.
    pub fn threshold(&self, log_mean: f64) -> f64 {
        self.slope() * log_mean + self.intercept()
    }

    /// Original row indices of the expressed genes lying strictly above the line.
    pub fn passing_genes(&self, stats: &GeneStatistics) -> Vec<usize> {
        stats
            .nonzero_indices
            .iter()
            .zip(stats.log_means.iter().zip(&stats.log_cvs))
            .filter(|&(_, (&log_mean, &log_cv))| log_cv > self.threshold(log_mean))
            .map(|(&gene, _)| gene)
            .collect()
    }

    /// Restricts `matrix` to the genes of `stats` lying above this line.
    pub fn apply(&self, stats: &GeneStatistics, matrix: &CscMatrix<f64>) -> Result<FilteredMatrix> {
        if stats.n_genes() != matrix.nrows() || stats.n_cells != matrix.ncols() {
            return Err(SubpopError::input(format!(
                "statistics describe a {} x {} matrix, got {} x {}",
                stats.n_genes(),
                stats.n_cells,
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let gene_indices = self.passing_genes(stats);
        let mut warnings = Vec::new();
        if gene_indices.is_empty() {
            let warning = Degeneracy::EmptyFilteredGeneSet {
                offset: self.offset,
            };
            log::warn!("{}", warning);
            warnings.push(warning);
        }
        let filtered = matrix.select_rows(&gene_indices)?;
        Ok(FilteredMatrix {
            gene_indices,
            matrix: filtered,
            line: Some(*self),
            warnings,
        })
    }

    /// End points of the trend over the observed log10 mean range, for plotting overlays.
    pub fn trend_endpoints(&self, stats: &GeneStatistics) -> Option<[(f64, f64); 2]> {
        let lo = stats.log_means.iter().copied().reduce(f64::min)?;
        let hi = stats.log_means.iter().copied().reduce(f64::max)?;
        Some([(lo, self.threshold(lo)), (hi, self.threshold(hi))])
    }
}

/// Genes retained by the noise filter and the matrix restricted to them.
#[derive(Debug, Clone)]
pub struct FilteredMatrix {
    /// Ascending original row indices.
    pub gene_indices: Vec<usize>,
    /// `gene_indices.len()` rows, every cell of the input.
    pub matrix: CscMatrix<f64>,
    /// `None` when no trend could be fitted.
    pub line: Option<NoiseLine>,
    pub warnings: Vec<Degeneracy>,
}

impl FilteredMatrix {
    pub fn n_genes(&self) -> usize {
        self.gene_indices.len()
    }

    pub fn n_cells(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.gene_indices.is_empty()
    }

    /// Names of the retained genes, given names aligned to the original rows.
    pub fn gene_names<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<String>> {
        self.gene_indices
            .iter()
            .map(|&g| {
                labels.get(g).map(|s| s.as_ref().to_string()).ok_or_else(|| {
                    SubpopError::input(format!(
                        "gene label list has {} entries, filtered gene index {} is out of range",
                        labels.len(),
                        g
                    ))
                })
            })
            .collect()
    }
}

/// Fits the noise line on `stats` and keeps the genes above it.
///
/// Never fails on degenerate data: without enough expressed genes, or when no gene passes,
/// the result is an empty (zero-row) matrix carrying a [`Degeneracy`] warning.
pub fn filter_genes(
    stats: &GeneStatistics,
    matrix: &CscMatrix<f64>,
    config: &NoiseFilterConfig,
) -> Result<FilteredMatrix> {
    match NoiseLine::fit(stats, config.offset)? {
        Some(line) => {
            let filtered = line.apply(stats, matrix)?;
            log::info!(
                "Noise filter kept {} of {} genes (slope {:.4}, intercept {:.4}, offset {})",
                filtered.n_genes(),
                stats.n_genes(),
                line.slope(),
                line.intercept(),
                config.offset
            );
            Ok(filtered)
        }
        None => {
            let warning = Degeneracy::InsufficientTrendGenes {
                available: stats.n_expressed(),
            };
            log::warn!("{}", warning);
            Ok(FilteredMatrix {
                gene_indices: Vec::new(),
                matrix: matrix.select_rows(&[])?,
                line: None,
                warnings: vec![warning],
            })
        }
    }
}

fn validate_offset(offset: f64) -> Result<()> {
    if offset.is_finite() && offset > 0.0 {
        Ok(())
    } else {
        Err(SubpopError::config(
            "offset",
            format!("must be a positive finite number, got {}", offset),
        ))
    }
}

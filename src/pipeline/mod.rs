//! # Subpopulation Analysis
//!
//! Chains the stages for one cell type:
//!
//! 1. assemble the cells of the target type across samples ([`crate::assembler`])
//! 2. per-gene mean and variance ([`crate::statistics`])
//! 3. noise-floor gene filter ([`crate::filter`])
//! 4. PCA or oNMF embedding ([`crate::dimred`])
//! 5. k-means on the embedding, regrouping the filtered matrix ([`crate::clustering`])
//!
//! [`SubpopulationAnalysis`] holds the artifacts of steps 1-3, which do not depend on
//! the reduction. Embeddings and clusterings are returned to the caller, so several
//! methods and feature counts can be compared on the same filtered data.

use std::collections::BTreeMap;

use nalgebra_sparse::CscMatrix;

use crate::assembler::{assemble_cell_type, AssembledMatrix, SampleMatrix};
use crate::clustering::{cluster, ClusterSource, Clusters, KMeansConfig};
use crate::config::SubpopConfig;
use crate::dimred::{Embedding, ReductionMethod};
use crate::error::{Degeneracy, Result, SubpopError};
use crate::filter::{filter_genes, FilteredMatrix, NoiseFilterConfig, NoiseLine};
use crate::statistics::{mean_variance, GeneStatistics};
use crate::utils::SampleIdentifier;

#[derive(Debug, Clone)]
pub struct SubpopulationAnalysis<S: SampleIdentifier> {
    assembled: AssembledMatrix<S>,
    gene_labels: Vec<String>,
    stats: GeneStatistics,
    filtered: FilteredMatrix,
    config: SubpopConfig,
}

/// Embedding and clustering produced by [`SubpopulationAnalysis::run`].
#[derive(Debug, Clone)]
pub struct SubpopulationResult {
    pub embedding: Embedding,
    pub clusters: Clusters,
}

impl SubpopulationResult {
    pub fn warnings(&self) -> &[Degeneracy] {
        &self.embedding.warnings
    }
}

impl SubpopulationAnalysis<usize> {
    /// Analysis of a matrix that is already restricted to one cell type. Cells are
    /// attributed to sample `0`.
    pub fn from_matrix(
        matrix: CscMatrix<f64>,
        gene_labels: Vec<String>,
        config: SubpopConfig,
    ) -> Result<Self> {
        let cells = (0..matrix.ncols()).map(|c| (0, c)).collect();
        Self::from_assembled(AssembledMatrix { matrix, cells }, gene_labels, config)
    }
}

impl<S: SampleIdentifier> SubpopulationAnalysis<S> {
    /// Assembles the cells labelled `cell_type` from `samples` and filters their genes.
    pub fn from_samples(
        samples: &BTreeMap<S, SampleMatrix>,
        selection: Option<&[S]>,
        cell_type: &str,
        gene_labels: Vec<String>,
        config: SubpopConfig,
    ) -> Result<Self> {
        let assembled = assemble_cell_type(samples, selection, cell_type)?;
        Self::from_assembled(assembled, gene_labels, config)
    }

    pub fn from_assembled(
        assembled: AssembledMatrix<S>,
        gene_labels: Vec<String>,
        config: SubpopConfig,
    ) -> Result<Self> {
        config.validate()?;
        let matrix = &assembled.matrix;
        if gene_labels.len() != matrix.nrows() {
            return Err(SubpopError::input(format!(
                "{} gene labels for {} genes",
                gene_labels.len(),
                matrix.nrows()
            )));
        }

        let stats = mean_variance(matrix, &config.statistics())?;
        let filtered = filter_genes(&stats, matrix, &config.filter())?;

        Ok(Self {
            assembled,
            gene_labels,
            stats,
            filtered,
            config,
        })
    }

    /// Same data filtered with another offset. The gene statistics are reused.
    pub fn with_offset(&self, offset: f64) -> Result<Self> {
        let config = SubpopConfig {
            offset,
            ..self.config.clone()
        };
        config.validate()?;
        let filtered = filter_genes(
            &self.stats,
            &self.assembled.matrix,
            &NoiseFilterConfig { offset },
        )?;
        Ok(Self {
            assembled: self.assembled.clone(),
            gene_labels: self.gene_labels.clone(),
            stats: self.stats.clone(),
            filtered,
            config,
        })
    }

    /// genes × cells, all genes.
    pub fn matrix(&self) -> &CscMatrix<f64> {
        &self.assembled.matrix
    }

    /// Sample and original column of every cell.
    pub fn cells(&self) -> &[(S, usize)] {
        &self.assembled.cells
    }

    pub fn gene_labels(&self) -> &[String] {
        &self.gene_labels
    }

    pub fn statistics(&self) -> &GeneStatistics {
        &self.stats
    }

    pub fn filtered(&self) -> &FilteredMatrix {
        &self.filtered
    }

    pub fn noise_line(&self) -> Option<&NoiseLine> {
        self.filtered.line.as_ref()
    }

    pub fn config(&self) -> &SubpopConfig {
        &self.config
    }

    pub fn filtered_gene_names(&self) -> Result<Vec<String>> {
        self.filtered.gene_names(&self.gene_labels)
    }

    /// Noise-line overlay end points over the observed log10 mean range.
    pub fn trend_endpoints(&self) -> Option<[(f64, f64); 2]> {
        self.noise_line()
            .and_then(|line| line.trend_endpoints(&self.stats))
    }

    pub fn embed(&self, method: ReductionMethod, nfeats: usize) -> Result<Embedding> {
        self.config
            .reducer(method)
            .reduce(&self.assembled.matrix, &self.filtered, nfeats)
    }

    pub fn cluster(&self, embedding: &Embedding, config: &KMeansConfig) -> Result<Clusters> {
        cluster(embedding, &self.filtered, config)
    }

    /// Clusters the embedding named by `method` (`"pca"` or `"onmf"`).
    ///
    /// The name is checked before anything else; an unknown name or a method without a
    /// matching entry in `embeddings` is a configuration error.
    pub fn cluster_by_name(
        &self,
        embeddings: &[Embedding],
        method: &str,
        config: &KMeansConfig,
    ) -> Result<Clusters> {
        let source: ClusterSource = method.parse()?;
        let embedding = embeddings
            .iter()
            .find(|e| e.method == source)
            .ok_or_else(|| {
                SubpopError::config("method", format!("no {} embedding has been computed", source))
            })?;
        self.cluster(embedding, config)
    }

    /// Embeds with the configured method and feature count, then clusters.
    pub fn run(&self) -> Result<SubpopulationResult> {
        let embedding = self.embed(self.config.method, self.config.nfeats)?;
        let clusters = self.cluster(&embedding, &self.config.kmeans)?;
        Ok(SubpopulationResult {
            embedding,
            clusters,
        })
    }
}

//! k-means clustering of cell embeddings and regrouping of the filtered matrix by cluster.

use std::collections::BTreeMap;

use nalgebra_sparse::CscMatrix;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dimred::{Embedding, ReductionMethod};
use crate::error::{Result, SubpopError};
use crate::filter::FilteredMatrix;
use crate::sparse::MatrixSelect;

/// Name of the embedding a clustering runs on (`"pca"` or `"onmf"`).
pub type ClusterSource = ReductionMethod;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    pub n_clusters: usize,
    pub max_iter: usize,
    /// Lloyd iterations stop once no centroid moves further than this.
    pub tolerance: f64,
    pub seed: u64,
    /// Independent k-means++ restarts; the lowest inertia wins.
    pub n_init: usize,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_clusters: 13,
            max_iter: 300,
            tolerance: 1e-4,
            seed: 0,
            n_init: 10,
        }
    }
}

impl KMeansConfig {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            ..Self::default()
        }
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Checks the settings, including `n_clusters` against the number of points.
    pub fn validate(&self, n_samples: usize) -> Result<()> {
        if self.n_clusters == 0 || self.n_clusters > n_samples {
            return Err(SubpopError::config(
                "n_clusters",
                format!(
                    "must be between 1 and the number of cells ({}), got {}",
                    n_samples, self.n_clusters
                ),
            ));
        }
        if self.max_iter == 0 {
            return Err(SubpopError::config("max_iter", "must be at least 1"));
        }
        if self.n_init == 0 {
            return Err(SubpopError::config("n_init", "must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(SubpopError::config(
                "tolerance",
                format!("must be a nonnegative finite number, got {}", self.tolerance),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub labels: Vec<usize>,
    /// n_clusters × features
    pub centroids: Array2<f64>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
    pub n_iter: usize,
}

/// k-means on the rows of `data` with k-means++ seeding and Lloyd iterations.
///
/// All restarts draw from one seeded generator, so the result depends only on
/// `data` and `config`.
pub fn kmeans(data: ArrayView2<f64>, config: &KMeansConfig) -> Result<KMeansResult> {
    let (n, dim) = data.dim();
    if n == 0 {
        return Err(SubpopError::input("cannot cluster an empty embedding"));
    }
    if dim == 0 {
        return Err(SubpopError::input("embedding has no features"));
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(SubpopError::input("embedding contains non-finite coordinates"));
    }
    config.validate(n)?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut best: Option<KMeansResult> = None;

    for run in 0..config.n_init {
        let centroids = kmeans_plus_plus(data, config.n_clusters, &mut rng);
        let result = lloyd(data, centroids, config);
        log::debug!(
            "k-means run {}: inertia {:.6e} after {} iterations",
            run,
            result.inertia,
            result.n_iter
        );
        match &best {
            Some(b) if b.inertia <= result.inertia => {}
            _ => best = Some(result),
        }
    }

    best.ok_or_else(|| SubpopError::Numerical("k-means produced no result".into()))
}

fn kmeans_plus_plus(data: ArrayView2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
    let n = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut dists: Vec<f64> = data
        .axis_iter(Axis(0))
        .map(|p| sq_euclidean(p, centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = dists.iter().sum();
        let chosen = if total == 0.0 {
            // Every point coincides with a centroid already
            c % n
        } else {
            let threshold = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            dists
                .iter()
                .position(|&d| {
                    cumulative += d;
                    cumulative >= threshold
                })
                .unwrap_or(n - 1)
        };
        centroids.row_mut(c).assign(&data.row(chosen));

        for (d, p) in dists.iter_mut().zip(data.axis_iter(Axis(0))) {
            *d = d.min(sq_euclidean(p, centroids.row(c)));
        }
    }
    centroids
}

fn lloyd(data: ArrayView2<f64>, mut centroids: Array2<f64>, config: &KMeansConfig) -> KMeansResult {
    let k = centroids.nrows();
    let mut labels = vec![0usize; data.nrows()];
    let mut n_iter = 0;

    while n_iter < config.max_iter {
        n_iter += 1;
        assign(data, centroids.view(), &mut labels);

        let mut sums = Array2::<f64>::zeros(centroids.dim());
        let mut counts = vec![0usize; k];
        for (p, &label) in data.axis_iter(Axis(0)).zip(&labels) {
            sums.row_mut(label).scaled_add(1.0, &p);
            counts[label] += 1;
        }

        let mut max_shift = 0.0f64;
        for (c, &count) in counts.iter().enumerate() {
            // Empty clusters keep their centroid
            if count == 0 {
                continue;
            }
            let mut updated = sums.row(c).to_owned();
            updated /= count as f64;
            max_shift = max_shift.max(sq_euclidean(updated.view(), centroids.row(c)).sqrt());
            centroids.row_mut(c).assign(&updated);
        }

        if max_shift < config.tolerance {
            break;
        }
    }

    let inertia = assign(data, centroids.view(), &mut labels);
    KMeansResult {
        labels,
        centroids,
        inertia,
        n_iter,
    }
}

/// Assigns every point to its nearest centroid (lowest index on ties) and returns the inertia.
fn assign(data: ArrayView2<f64>, centroids: ArrayView2<f64>, labels: &mut [usize]) -> f64 {
    let mut inertia = 0.0;
    for (p, label) in data.axis_iter(Axis(0)).zip(labels.iter_mut()) {
        let mut best = (0, f64::INFINITY);
        for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
            let d = sq_euclidean(p, centroid);
            if d < best.1 {
                best = (c, d);
            }
        }
        *label = best.0;
        inertia += best.1;
    }
    inertia
}

fn sq_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cluster assignment and the filtered matrix split by cluster.
#[derive(Debug, Clone)]
pub struct Clusters {
    pub method: ReductionMethod,
    /// Label in `0..n_clusters` per cell.
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    pub inertia: f64,
    /// Every label in `0..n_clusters` mapped to the filtered genes × member cells.
    pub by_cluster: BTreeMap<usize, CscMatrix<f64>>,
}

impl Clusters {
    pub fn n_clusters(&self) -> usize {
        self.by_cluster.len()
    }

    /// Cell indices carrying `label`, ascending.
    pub fn members(&self, label: usize) -> Vec<usize> {
        members(&self.labels, label)
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.by_cluster.values().map(|m| m.ncols()).collect()
    }
}

fn members(labels: &[usize], label: usize) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter_map(|(cell, &l)| (l == label).then_some(cell))
        .collect()
}

/// Splits the columns of `matrix` by `labels`. Every label in `0..n_clusters` is present.
pub fn partition(
    matrix: &CscMatrix<f64>,
    labels: &[usize],
    n_clusters: usize,
) -> Result<BTreeMap<usize, CscMatrix<f64>>> {
    if labels.len() != matrix.ncols() {
        return Err(SubpopError::input(format!(
            "{} labels for {} cells",
            labels.len(),
            matrix.ncols()
        )));
    }
    if let Some(&bad) = labels.iter().find(|&&l| l >= n_clusters) {
        return Err(SubpopError::input(format!(
            "label {} outside 0..{}",
            bad, n_clusters
        )));
    }

    let blocks = (0..n_clusters)
        .into_par_iter()
        .map(|label| Ok((label, matrix.select_cols(&members(labels, label))?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(blocks.into_iter().collect())
}

/// Clusters the cells of `embedding` and regroups `filtered` by the resulting labels.
pub fn cluster(
    embedding: &Embedding,
    filtered: &FilteredMatrix,
    config: &KMeansConfig,
) -> Result<Clusters> {
    if embedding.n_cells() != filtered.n_cells() {
        return Err(SubpopError::input(format!(
            "embedding has {} cells, filtered matrix has {}",
            embedding.n_cells(),
            filtered.n_cells()
        )));
    }

    let result = kmeans(embedding.coordinates.view(), config)?;
    let by_cluster = partition(&filtered.matrix, &result.labels, config.n_clusters)?;

    log::info!(
        "k-means on {} embedding: {} cells in {} clusters (inertia {:.4e})",
        embedding.method,
        result.labels.len(),
        config.n_clusters,
        result.inertia
    );

    Ok(Clusters {
        method: embedding.method,
        labels: result.labels,
        centroids: result.centroids,
        inertia: result.inertia,
        by_cluster,
    })
}

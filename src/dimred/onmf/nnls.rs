//! Nonnegative least squares against a fixed basis.
//!
//! Solves `min ||A x - b||` subject to `x >= 0` with the active set method of
//! Lawson and Hanson, working on the normal equations (`AᵀA`, `Aᵀb`) so the Gram
//! matrix is shared by every right-hand side.

use anyhow::anyhow;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Precomputed Gram matrix of a basis `A` (rows × k).
pub struct NnlsSolver {
    gram: Array2<f64>,
    tolerance: f64,
    max_iter: usize,
}

impl NnlsSolver {
    pub fn new(basis: ArrayView2<f64>) -> Self {
        let k = basis.ncols();
        let gram = basis.t().dot(&basis);
        let scale = gram.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);
        NnlsSolver {
            gram,
            tolerance: 10.0 * f64::EPSILON * scale * k.max(1) as f64,
            max_iter: 3 * k.max(1),
        }
    }

    pub fn n_features(&self) -> usize {
        self.gram.nrows()
    }

    /// Solves for one right-hand side given `Aᵀb`.
    pub fn solve(&self, atb: ArrayView1<f64>) -> anyhow::Result<Array1<f64>> {
        let k = self.n_features();
        if atb.len() != k {
            return Err(anyhow!("Expected {} projections, got {}", k, atb.len()));
        }

        let mut x = Array1::<f64>::zeros(k);
        let mut passive = vec![false; k];
        let mut w = atb.to_owned();
        let mut outer = 0;

        loop {
            let candidate = (0..k)
                .filter(|&j| !passive[j] && w[j] > self.tolerance)
                .max_by(|&a, &b| w[a].total_cmp(&w[b]));
            let Some(j) = candidate else {
                break;
            };
            if outer >= self.max_iter {
                log::debug!("NNLS reached {} outer iterations", outer);
                break;
            }
            outer += 1;
            passive[j] = true;

            let mut s = self.solve_passive(&passive, atb)?;
            // Step back towards feasibility while the unconstrained solution has
            // nonpositive entries in the passive set
            while (0..k).any(|i| passive[i] && s[i] <= self.tolerance) {
                let alpha = (0..k)
                    .filter(|&i| passive[i] && s[i] <= self.tolerance)
                    .map(|i| x[i] / (x[i] - s[i]))
                    .filter(|a| a.is_finite())
                    .fold(f64::INFINITY, f64::min);
                let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 0.0 };

                for i in 0..k {
                    x[i] += alpha * (s[i] - x[i]);
                    if passive[i] && x[i] <= self.tolerance {
                        passive[i] = false;
                        x[i] = 0.0;
                    }
                }
                s = self.solve_passive(&passive, atb)?;
            }

            x = s;
            w = &atb - &self.gram.dot(&x);
        }

        x.mapv_inplace(|v| v.max(0.0));
        Ok(x)
    }

    /// Unconstrained solution restricted to the passive set, zero elsewhere.
    fn solve_passive(&self, passive: &[bool], atb: ArrayView1<f64>) -> anyhow::Result<Array1<f64>> {
        let idx: Vec<usize> = (0..passive.len()).filter(|&i| passive[i]).collect();
        let mut s = Array1::zeros(passive.len());
        if idx.is_empty() {
            return Ok(s);
        }

        let p = idx.len();
        let sub = DMatrix::from_fn(p, p, |a, b| self.gram[[idx[a], idx[b]]]);
        let rhs = DVector::from_fn(p, |a, _| atb[idx[a]]);

        let solution = match sub.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => sub
                .clone()
                .lu()
                .solve(&rhs)
                .or_else(|| sub.svd(true, true).solve(&rhs, f64::EPSILON).ok())
                .ok_or_else(|| anyhow!("Singular NNLS subsystem of size {}", p))?,
        };

        for (a, &i) in idx.iter().enumerate() {
            s[i] = solution[a];
        }
        Ok(s)
    }
}

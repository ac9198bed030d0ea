use anyhow::anyhow;
use nalgebra::linalg::SVD as NalgebraSVD;
use ndarray::{Array1, Array2, ArrayView2};
use nshare::{IntoNalgebra, IntoNdarray2};

/// Thin singular value decomposition `x = u * diag(s) * vt`, with singular values in
/// descending order and signs fixed so that the largest-magnitude entry of every column
/// of `u` is positive.
pub struct SVD {
    u: Array2<f64>,
    s: Array1<f64>,
    vt: Array2<f64>,
}

impl SVD {
    pub fn new(matrix: ArrayView2<f64>) -> anyhow::Result<Self> {
        let (m, n) = matrix.dim();
        if m == 0 || n == 0 {
            return Err(anyhow!("Cannot decompose an empty {} x {} matrix", m, n));
        }

        let dense = matrix.into_nalgebra().clone_owned();
        let svd = NalgebraSVD::try_new(dense, true, true, f64::EPSILON, 0)
            .ok_or_else(|| anyhow!("SVD did not converge"))?;
        let u = svd.u.ok_or_else(|| anyhow!("SVD did not produce U"))?;
        let vt = svd.v_t.ok_or_else(|| anyhow!("SVD did not produce V^T"))?;
        let singular_values = svd.singular_values;

        let mut order: Vec<usize> = (0..singular_values.len()).collect();
        order.sort_by(|&a, &b| singular_values[b].total_cmp(&singular_values[a]));

        let u_full = u.into_ndarray2().into_owned();
        let vt_full = vt.into_ndarray2().into_owned();
        let k = order.len();
        let mut u = Array2::zeros((m, k));
        let mut vt = Array2::zeros((k, n));
        let mut s = Array1::zeros(k);

        for (new_idx, &old_idx) in order.iter().enumerate() {
            s[new_idx] = singular_values[old_idx];
            u.column_mut(new_idx).assign(&u_full.column(old_idx));
            vt.row_mut(new_idx).assign(&vt_full.row(old_idx));
        }

        flip_signs(&mut u, &mut vt);

        Ok(SVD { u, s, vt })
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    pub fn vt(&self) -> &Array2<f64> {
        &self.vt
    }
}

fn flip_signs(u: &mut Array2<f64>, vt: &mut Array2<f64>) {
    for k in 0..u.ncols() {
        let pivot = u
            .column(k)
            .iter()
            .copied()
            .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            u.column_mut(k).mapv_inplace(|v| -v);
            vt.row_mut(k).mapv_inplace(|v| -v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn reconstruct(svd: &SVD) -> Array2<f64> {
        let s_diag = Array2::from_diag(svd.s());
        svd.u().dot(&s_diag).dot(svd.vt())
    }

    #[test]
    fn test_reconstruction_and_order() {
        let x = array![[3.0, 1.0, 1.0], [-1.0, 3.0, 1.0], [0.0, 2.0, 5.0], [1.0, 0.0, 2.0]];
        let svd = SVD::new(x.view()).unwrap();

        assert_eq!(svd.u().dim(), (4, 3));
        assert_eq!(svd.vt().dim(), (3, 3));
        assert!(svd.s().windows(2).into_iter().all(|w| w[0] >= w[1]));

        let rebuilt = reconstruct(&svd);
        for (a, b) in rebuilt.iter().zip(x.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_sign_convention() {
        let x = array![[-2.0, 0.0], [0.0, -1.0], [-1.0, 0.0]];
        let svd = SVD::new(x.view()).unwrap();
        for k in 0..svd.u().ncols() {
            let col = svd.u().column(k);
            let pivot = col
                .iter()
                .copied()
                .fold(0.0f64, |b, v| if v.abs() > b.abs() { v } else { b });
            assert!(pivot >= 0.0);
        }
    }

    #[test]
    fn test_empty_matrix() {
        let x = Array2::<f64>::zeros((0, 3));
        assert!(SVD::new(x.view()).is_err());
    }
}

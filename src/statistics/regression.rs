use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{Result, SubpopError};

/// Result of an ordinary least squares fit `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation coefficient, `0.0` when either variable has no spread.
    pub r_value: f64,
    /// Two-sided p-value for a zero slope; `NaN` with fewer than three points.
    pub p_value: f64,
    /// Standard error of the slope; `NaN` with fewer than three points.
    pub stderr: f64,
}

/// Least squares line through `(x[i], y[i])`.
///
/// With no spread in `x` the slope is undefined and the fit falls back to the
/// horizontal line through the mean of `y`.
pub fn linregress(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    if x.len() != y.len() {
        return Err(SubpopError::input(format!(
            "regression inputs differ in length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    let n = x.len();
    if n < 2 {
        return Err(SubpopError::input(format!(
            "regression needs at least two points, got {}",
            n
        )));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(SubpopError::input("regression inputs must be finite"));
    }

    let nf = n as f64;
    let x_mean = x.iter().sum::<f64>() / nf;
    let y_mean = y.iter().sum::<f64>() / nf;

    let mut ssxm = 0.0;
    let mut ssym = 0.0;
    let mut ssxym = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - x_mean;
        let dy = yi - y_mean;
        ssxm += dx * dx;
        ssym += dy * dy;
        ssxym += dx * dy;
    }

    if ssxm == 0.0 {
        return Ok(LinearFit {
            slope: 0.0,
            intercept: y_mean,
            r_value: 0.0,
            p_value: f64::NAN,
            stderr: f64::NAN,
        });
    }

    let slope = ssxym / ssxm;
    let intercept = y_mean - slope * x_mean;
    let r_value = if ssym == 0.0 {
        0.0
    } else {
        (ssxym / (ssxm * ssym).sqrt()).clamp(-1.0, 1.0)
    };

    let (p_value, stderr) = if n > 2 {
        let df = nf - 2.0;
        let stderr = ((1.0 - r_value * r_value).max(0.0) * ssym / ssxm / df).sqrt();
        let p_value = if r_value.abs() >= 1.0 {
            0.0
        } else {
            let t = r_value * (df / ((1.0 - r_value) * (1.0 + r_value))).sqrt();
            StudentsT::new(0.0, 1.0, df)
                .map(|dist| 2.0 * (1.0 - dist.cdf(t.abs())))
                .unwrap_or(f64::NAN)
        };
        (p_value, stderr)
    } else {
        (f64::NAN, f64::NAN)
    };

    Ok(LinearFit {
        slope,
        intercept,
        r_value,
        p_value,
        stderr,
    })
}

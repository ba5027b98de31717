//! Multivariate Gaussian density evaluation over sets of grid points.
//!
//! A [`GaussianDensity`] factors its covariance once and then evaluates
//!
//! $$
//! p(x) = \frac{\exp\left(-\tfrac{1}{2}(x-\mu)^T \Sigma^{-1} (x-\mu)\right)}{\sqrt{(2\pi)^d |\Sigma|}}
//! $$
//!
//! at every column of a `d × N` point matrix. Columns are independent, so the evaluation is
//! spread across the rayon thread pool.
use std::f64::consts::PI;

use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::ConfigurationError;
use crate::linalg::symmetrize;

/// A Gaussian with precomputed precision matrix and log normalizer.
#[derive(Clone, Debug)]
pub struct GaussianDensity {
    mean: DVector<f64>,
    precision: DMatrix<f64>,
    log_normalizer: f64,
}
impl GaussianDensity {
    /// Factor `covariance` and build the density.
    ///
    /// # Errors
    /// `DimensionMismatch` / `NotSquare` on shape problems, `NotPositiveDefinite` when the
    /// Cholesky factorization fails (the reported eigenvalue is the smallest one).
    pub fn new(
        mean: DVector<f64>,
        covariance: &DMatrix<f64>,
    ) -> Result<GaussianDensity, ConfigurationError> {
        if !covariance.is_square() {
            return Err(ConfigurationError::NotSquare {
                context: "covariance",
                rows: covariance.nrows(),
                cols: covariance.ncols(),
            });
        }
        if covariance.nrows() != mean.len() {
            return Err(ConfigurationError::DimensionMismatch {
                context: "gaussian covariance",
                expected: mean.len(),
                found: covariance.nrows(),
            });
        }
        if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(ConfigurationError::NonFinite("gaussian parameters"));
        }
        let sym = symmetrize(covariance);
        let chol = match Cholesky::new(sym.clone()) {
            Some(chol) => chol,
            None => {
                let eigenvalue = SymmetricEigen::new(sym).eigenvalues.min();
                return Err(ConfigurationError::NotPositiveDefinite { eigenvalue });
            }
        };
        let d = mean.len() as f64;
        let l = chol.l();
        let log_det = 2.0 * l.diagonal().iter().map(|v| v.ln()).sum::<f64>();
        Ok(GaussianDensity {
            mean,
            precision: chol.inverse(),
            log_normalizer: -0.5 * (d * (2.0 * PI).ln() + log_det),
        })
    }
    pub fn dim(&self) -> usize {
        self.mean.len()
    }
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }
    /// Squared Mahalanobis distance of `x - shift` from the mean.
    fn mahalanobis_squared(&self, x: &[f64], shift: Option<&[f64]>) -> f64 {
        let d = self.mean.len();
        let diff = |i: usize| match shift {
            Some(s) => x[i] - s[i] - self.mean[i],
            None => x[i] - self.mean[i],
        };
        let mut q = 0.0;
        for j in 0..d {
            let dj = diff(j);
            let mut row = 0.0;
            for i in 0..d {
                row += self.precision[(i, j)] * diff(i);
            }
            q += row * dj;
        }
        q
    }
    pub fn log_pdf(&self, x: &[f64]) -> f64 {
        self.log_normalizer - 0.5 * self.mahalanobis_squared(x, None)
    }
    pub fn pdf(&self, x: &[f64]) -> f64 {
        self.log_pdf(x).exp()
    }
    /// Density of `x - shift`. Used as a translated noise kernel.
    pub fn pdf_shifted(&self, x: &[f64], shift: &[f64]) -> f64 {
        (self.log_normalizer - 0.5 * self.mahalanobis_squared(x, Some(shift))).exp()
    }
    /// Evaluate the density at every column of `points` (`d × N`).
    ///
    /// # Panics
    /// If `points.nrows()` differs from the density dimension.
    pub fn evaluate(&self, points: &DMatrix<f64>) -> DVector<f64> {
        let d = self.dim();
        assert_eq!(points.nrows(), d, "GaussianDensity::evaluate: dimension mismatch");
        let values: Vec<f64> = points
            .as_slice()
            .par_chunks_exact(d)
            .map(|x| self.pdf(x))
            .collect();
        DVector::from_vec(values)
    }
}

/// Evaluate `N(mean, covariance)` at each column of `points`.
///
/// # Arguments
/// * `points` - `d × N` matrix of evaluation points
/// * `mean` - length `d` mean vector
/// * `covariance` - `d × d` positive definite covariance
///
/// # Returns
/// The density value at each point, in column order.
pub fn gaussian_density(
    points: &DMatrix<f64>,
    mean: &DVector<f64>,
    covariance: &DMatrix<f64>,
) -> Result<DVector<f64>, ConfigurationError> {
    if points.nrows() != mean.len() {
        return Err(ConfigurationError::DimensionMismatch {
            context: "gaussian evaluation points",
            expected: mean.len(),
            found: points.nrows(),
        });
    }
    Ok(GaussianDensity::new(mean.clone(), covariance)?.evaluate(points))
}

/// Rescale density weights in place so that `Σ w · cell_volume == 1`.
///
/// Returns the normalizer `Σ w · cell_volume` before scaling, or `None` (weights untouched)
/// when it is zero, negative, or not finite.
pub fn normalize_density(weights: &mut DVector<f64>, cell_volume: f64) -> Option<f64> {
    let normalizer = weights.sum() * cell_volume;
    if !normalizer.is_finite() || normalizer <= 0.0 {
        return None;
    }
    *weights /= normalizer;
    Some(normalizer)
}

//! The point-mass density representation.
//!
//! A [`PointMassState`] is a probability density sampled on a covariance-aligned lattice: one
//! density weight per grid point, such that `Σ w_i · Π grid_delta ≈ 1`. The weights are
//! densities, not probability masses; the mass carried by point `i` is `w_i · cell_volume()`.
//!
//! States are values. Prediction returns a state on a brand new grid and update returns a
//! state on a copy of the predicted grid, so a state handed to either is never modified.
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};

use crate::density::{gaussian_density, normalize_density};
use crate::error::{ConfigurationError, FilterError};
use crate::grid::{Grid, build_grid};

/// Grid-sampled probability density over a Euclidean state space.
#[derive(Clone, Debug)]
pub struct PointMassState {
    points: DMatrix<f64>,
    weights: DVector<f64>,
    grid_delta: DVector<f64>,
    grid_dim: Vec<(f64, f64)>,
    center: DVector<f64>,
    eigen_basis: DMatrix<f64>,
    points_per_axis: Vec<usize>,
    timestamp: DateTime<Utc>,
}
impl PointMassState {
    /// Discretise the Gaussian prior `N(mean, covariance)` onto a fresh lattice.
    ///
    /// # Arguments
    /// * `mean` - prior mean; also the grid centre
    /// * `covariance` - prior covariance; also defines the grid frame
    /// * `scale_factor` - half-width of each grid axis in standard deviations (4 is typical)
    /// * `points_per_axis` - odd lattice resolution per axis, at least 3
    /// * `timestamp` - time of validity of the prior
    ///
    /// # Errors
    /// `FilterError::Configuration` for any invalid input, or `FilterError::Divergence` if the
    /// density vanishes on every grid point.
    pub fn from_gaussian(
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
        scale_factor: f64,
        points_per_axis: &[usize],
        timestamp: DateTime<Utc>,
    ) -> Result<PointMassState, FilterError> {
        let grid = build_grid(mean, covariance, scale_factor, points_per_axis)?;
        let mut weights = gaussian_density(&grid.points, mean, covariance)?;
        normalize_density(&mut weights, grid.cell_volume())
            .ok_or(FilterError::Divergence { normalizer: 0.0 })?;
        Ok(PointMassState::from_grid(
            grid,
            weights,
            points_per_axis.to_vec(),
            timestamp,
        ))
    }
    /// Assemble a state from a freshly built grid and matching weights.
    pub(crate) fn from_grid(
        grid: Grid,
        weights: DVector<f64>,
        points_per_axis: Vec<usize>,
        timestamp: DateTime<Utc>,
    ) -> PointMassState {
        debug_assert_eq!(weights.len(), grid.num_points());
        PointMassState {
            points: grid.points,
            weights,
            grid_delta: grid.grid_delta,
            grid_dim: grid.grid_dim,
            center: grid.center,
            eigen_basis: grid.eigen_basis,
            points_per_axis,
            timestamp,
        }
    }
    /// Copy of this state's grid carrying new weights and a new time.
    pub(crate) fn with_weights(
        &self,
        weights: DVector<f64>,
        timestamp: DateTime<Utc>,
    ) -> PointMassState {
        debug_assert_eq!(weights.len(), self.num_points());
        PointMassState {
            points: self.points.clone(),
            weights,
            grid_delta: self.grid_delta.clone(),
            grid_dim: self.grid_dim.clone(),
            center: self.center.clone(),
            eigen_basis: self.eigen_basis.clone(),
            points_per_axis: self.points_per_axis.clone(),
            timestamp,
        }
    }
    pub fn ndim(&self) -> usize {
        self.points.nrows()
    }
    pub fn num_points(&self) -> usize {
        self.points.ncols()
    }
    /// `d × N` grid points, one per column.
    pub fn points(&self) -> &DMatrix<f64> {
        &self.points
    }
    /// Density weight of each grid point.
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }
    pub fn grid_delta(&self) -> &DVector<f64> {
        &self.grid_delta
    }
    pub fn grid_dim(&self) -> &[(f64, f64)] {
        &self.grid_dim
    }
    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }
    pub fn eigen_basis(&self) -> &DMatrix<f64> {
        &self.eigen_basis
    }
    pub fn points_per_axis(&self) -> &[usize] {
        &self.points_per_axis
    }
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    /// Volume of one lattice cell, `Π grid_delta`.
    pub fn cell_volume(&self) -> f64 {
        self.grid_delta.iter().product()
    }
    /// `Σ w_i · cell_volume`; one for a normalised state.
    pub fn total_probability(&self) -> f64 {
        self.weights.sum() * self.cell_volume()
    }
    /// Probability mass of each grid point, `w_i · cell_volume`.
    pub fn masses(&self) -> DVector<f64> {
        &self.weights * self.cell_volume()
    }
    /// First moment of the density, `Σ w_i x_i · cell_volume`.
    pub fn mean(&self) -> DVector<f64> {
        let d = self.ndim();
        let mut mean = DVector::<f64>::zeros(d);
        for (x, w) in self.points.as_slice().chunks_exact(d).zip(self.weights.iter()) {
            for i in 0..d {
                mean[i] += w * x[i];
            }
        }
        mean * self.cell_volume()
    }
    /// Second central moment, `Σ w_i (x_i − x̄)(x_i − x̄)ᵀ · cell_volume`.
    pub fn covar(&self) -> DMatrix<f64> {
        let d = self.ndim();
        let mean = self.mean();
        let mut covar = DMatrix::<f64>::zeros(d, d);
        let mut diff = vec![0.0; d];
        for (x, w) in self.points.as_slice().chunks_exact(d).zip(self.weights.iter()) {
            for i in 0..d {
                diff[i] = x[i] - mean[i];
            }
            for j in 0..d {
                let wj = w * diff[j];
                for i in j..d {
                    covar[(i, j)] += wj * diff[i];
                }
            }
        }
        for j in 0..d {
            for i in (j + 1)..d {
                covar[(j, i)] = covar[(i, j)];
            }
        }
        covar * self.cell_volume()
    }
    /// The grid point carrying the largest density weight.
    pub fn max_a_posteriori(&self) -> DVector<f64> {
        let (index, _) = self.weights.argmax();
        self.points.column(index).into_owned()
    }
    /// Check the public invariants. Used by tests and debug assertions.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let expected = self.points_per_axis.iter().product::<usize>();
        if self.num_points() != expected || self.weights.len() != expected {
            return Err(ConfigurationError::DimensionMismatch {
                context: "point-mass state",
                expected,
                found: self.weights.len(),
            });
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigurationError::NonFinite("point-mass weights"));
        }
        Ok(())
    }
}
impl Display for PointMassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.mean();
        write!(
            f,
            "PointMassState {{ t: {}, points: {}, mean: {:.4?} }}",
            self.timestamp.to_rfc3339(),
            self.num_points(),
            mean.as_slice()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn gaussian_prior_is_normalised() {
        let mean = DVector::from_vec(vec![1.0, -1.0]);
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.4, 0.4, 1.0]);
        let state = PointMassState::from_gaussian(&mean, &cov, 4.0, &[21, 21], t0()).unwrap();
        assert_eq!(state.num_points(), 441);
        assert_approx_eq!(state.total_probability(), 1.0, 1e-12);
        assert!(state.validate().is_ok());
        assert_eq!(state.timestamp(), t0());
        assert_eq!(state.points_per_axis(), &[21, 21]);
    }

    #[test]
    fn moments_reproduce_the_prior() {
        let mean = DVector::from_vec(vec![3.0, 10.0]);
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.4, 0.4, 1.0]);
        let state = PointMassState::from_gaussian(&mean, &cov, 5.0, &[31, 31], t0()).unwrap();
        let m = state.mean();
        assert_approx_eq!(m[0], 3.0, 1e-6);
        assert_approx_eq!(m[1], 10.0, 1e-6);
        let p = state.covar();
        assert_approx_eq!(p[(0, 0)], 2.0, 0.02);
        assert_approx_eq!(p[(1, 1)], 1.0, 0.02);
        assert_approx_eq!(p[(0, 1)], 0.4, 0.02);
        assert_approx_eq!(p[(1, 0)], p[(0, 1)], 1e-15);
    }

    #[test]
    fn map_estimate_is_the_centre_for_a_gaussian() {
        let mean = DVector::from_vec(vec![-4.0, 2.5, 7.0]);
        let cov = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 2.0, 3.0]));
        let state = PointMassState::from_gaussian(&mean, &cov, 4.0, &[5, 7, 9], t0()).unwrap();
        let map = state.max_a_posteriori();
        for i in 0..3 {
            assert_approx_eq!(map[i], mean[i], 1e-9);
        }
        assert_eq!(state.center(), &mean);
    }

    #[test]
    fn with_weights_shares_the_grid() {
        let state = PointMassState::from_gaussian(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            4.0,
            &[5, 5],
            t0(),
        )
        .unwrap();
        let later = t0() + chrono::TimeDelta::seconds(2);
        let uniform = DVector::from_element(25, 1.0 / (25.0 * state.cell_volume()));
        let other = state.with_weights(uniform, later);
        assert_eq!(other.points(), state.points());
        assert_eq!(other.grid_delta(), state.grid_delta());
        assert_eq!(other.eigen_basis(), state.eigen_basis());
        assert_eq!(other.timestamp(), later);
        assert_approx_eq!(other.total_probability(), 1.0, 1e-12);
    }

    #[test]
    fn invalid_prior_is_a_configuration_error() {
        let err = PointMassState::from_gaussian(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            4.0,
            &[4, 5],
            t0(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FilterError::Configuration(ConfigurationError::InvalidPointsPerAxis { .. })
        ));
    }

    #[test]
    fn display_summarises_state() {
        let state = PointMassState::from_gaussian(
            &DVector::from_vec(vec![1.0]),
            &DMatrix::identity(1, 1),
            4.0,
            &[3],
            t0(),
        )
        .unwrap();
        let text = format!("{state}");
        assert!(text.contains("points: 3"));
        assert!(text.starts_with("PointMassState"));
    }
}

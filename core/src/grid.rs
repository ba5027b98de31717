//! Covariance-aligned rectangular lattices.
//!
//! A point-mass grid is a regular lattice in the eigen-frame of a covariance matrix,
//! translated to a centre vector. Axis `i` of the lattice spans
//!
//! $$
//! [-s\sqrt{\lambda_i},\; s\sqrt{\lambda_i}]
//! $$
//!
//! with `Npa[i]` equally spaced samples, where `s` is the scale factor (number of standard
//! deviations covered) and `λ_i` the eigenvalue assigned to axis `i`. Points are enumerated
//! in mixed-radix order with axis 0 varying fastest.
use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::error::ConfigurationError;
use crate::lattice::strides;
use crate::linalg::aligned_symmetric_eigen;

/// Relative tolerance below which negative eigenvalues are treated as round-off.
pub const EIGEN_TOLERANCE: f64 = 1e-9;

/// A lattice of grid points together with the frame it was built in.
#[derive(Clone, Debug)]
pub struct Grid {
    /// `d × N` matrix, one column per grid point.
    pub points: DMatrix<f64>,
    /// Lattice spacing along each eigen-axis.
    pub grid_delta: DVector<f64>,
    /// `(min, max)` offset along each eigen-axis, symmetric about zero.
    pub grid_dim: Vec<(f64, f64)>,
    pub center: DVector<f64>,
    /// Orthonormal basis; column `i` is grid axis `i`.
    pub eigen_basis: DMatrix<f64>,
}
impl Grid {
    pub fn ndim(&self) -> usize {
        self.center.len()
    }
    pub fn num_points(&self) -> usize {
        self.points.ncols()
    }
    /// Volume of a single lattice cell, `Π grid_delta`.
    pub fn cell_volume(&self) -> f64 {
        self.grid_delta.iter().product()
    }
}

/// Total number of lattice points for the given resolution.
///
/// # Errors
/// `GridTooLarge` if the product overflows `usize`.
pub fn total_points(points_per_axis: &[usize]) -> Result<usize, ConfigurationError> {
    points_per_axis
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| ConfigurationError::GridTooLarge(points_per_axis.to_vec()))
}

/// Validate a lattice resolution: one entry per axis, each odd and at least 3.
pub fn validate_points_per_axis(
    points_per_axis: &[usize],
    ndim: usize,
) -> Result<(), ConfigurationError> {
    if points_per_axis.len() != ndim {
        return Err(ConfigurationError::DimensionMismatch {
            context: "points per axis",
            expected: ndim,
            found: points_per_axis.len(),
        });
    }
    if let Some((axis, &points)) = points_per_axis
        .iter()
        .enumerate()
        .find(|(_, n)| **n < 3 || **n % 2 == 0)
    {
        return Err(ConfigurationError::InvalidPointsPerAxis { axis, points });
    }
    Ok(())
}

/// Validate a scale factor: finite and strictly positive.
pub fn validate_scale_factor(scale_factor: f64) -> Result<(), ConfigurationError> {
    if !scale_factor.is_finite() || scale_factor <= 0.0 {
        return Err(ConfigurationError::InvalidScaleFactor(scale_factor));
    }
    Ok(())
}

/// Build a lattice aligned with the eigenvectors of `covariance` and centred at `mean`.
///
/// # Arguments
/// * `mean` - centre of the grid, length `d`
/// * `covariance` - `d × d` symmetric positive definite matrix defining the grid frame
/// * `scale_factor` - half-width of each axis in standard deviations
/// * `points_per_axis` - odd lattice resolution per axis, at least 3
///
/// # Errors
/// Any shape, positivity, or resolution problem is reported as a [`ConfigurationError`].
pub fn build_grid(
    mean: &DVector<f64>,
    covariance: &DMatrix<f64>,
    scale_factor: f64,
    points_per_axis: &[usize],
) -> Result<Grid, ConfigurationError> {
    let d = mean.len();
    if !covariance.is_square() {
        return Err(ConfigurationError::NotSquare {
            context: "grid covariance",
            rows: covariance.nrows(),
            cols: covariance.ncols(),
        });
    }
    if covariance.nrows() != d {
        return Err(ConfigurationError::DimensionMismatch {
            context: "grid covariance",
            expected: d,
            found: covariance.nrows(),
        });
    }
    validate_points_per_axis(points_per_axis, d)?;
    validate_scale_factor(scale_factor)?;
    if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
        return Err(ConfigurationError::NonFinite("grid mean or covariance"));
    }
    let n = total_points(points_per_axis)?;

    let eig = aligned_symmetric_eigen(covariance);
    let largest = eig.eigenvalues.iter().fold(0.0f64, |m, l| m.max(l.abs()));
    let tolerance = EIGEN_TOLERANCE * largest;
    let mut grid_delta = DVector::<f64>::zeros(d);
    let mut grid_dim = Vec::with_capacity(d);
    for axis in 0..d {
        let lambda = eig.eigenvalues[axis];
        if lambda < -tolerance {
            return Err(ConfigurationError::NotPositiveDefinite { eigenvalue: lambda });
        }
        let lambda = lambda.max(0.0);
        if lambda == 0.0 {
            return Err(ConfigurationError::DegenerateAxis { axis });
        }
        let half_width = scale_factor * lambda.sqrt();
        grid_delta[axis] = 2.0 * half_width / (points_per_axis[axis] - 1) as f64;
        grid_dim.push((-half_width, half_width));
    }

    // Mixed-radix enumeration: row `axis` of column `k` is digit `axis` of `k`.
    let strides = strides(points_per_axis);
    let lattice = DMatrix::<f64>::from_fn(d, n, |axis, k| {
        let index = (k / strides[axis]) % points_per_axis[axis];
        grid_dim[axis].0 + index as f64 * grid_delta[axis]
    });
    let mut points = &eig.eigenvectors * lattice;
    for mut column in points.column_iter_mut() {
        column += mean;
    }
    trace!(
        "built {}-point grid: delta = {:?}, eigenvalues = {:?}",
        n,
        grid_delta.as_slice(),
        eig.eigenvalues.as_slice()
    );
    Ok(Grid {
        points,
        grid_delta,
        grid_dim,
        center: mean.clone(),
        eigen_basis: eig.eigenvectors,
    })
}

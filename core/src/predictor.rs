//! Time update of the point-mass filter.
//!
//! The predictive density is the Chapman–Kolmogorov integral
//!
//! $$
//! p(x_{k+1}) = \int p(x_{k+1} \mid x_k)\, p(x_k)\, dx_k
//! $$
//!
//! evaluated on a new lattice that is rebuilt around the predicted moments at every step.
//! Three evaluation strategies are available:
//!
//! - **lattice convolution** (default for models exposing a transition matrix `F`): the prior
//!   density is transported through `F` by cubic interpolation at the pre-image of every new
//!   grid point, then convolved with the process noise kernel sampled at lattice offsets. The
//!   convolution runs through multidimensional FFTs in `O(N log N)`. The kernel is centred on
//!   a lattice offset, which the odd points-per-axis requirement of the grid builder
//!   guarantees. Kernels narrower than the lattice spacing degrade to the transported
//!   density;
//! - **kernel sum** (nonlinear models, or [`PropagationMethod::Convolution`]): every prior grid
//!   point is mapped through the deterministic dynamics and the predicted density is the
//!   mass-weighted sum of process-noise kernels centred on the mapped points. This works for
//!   arbitrary dynamics but costs `O(N_new · N_active · d²)` and needs a noise kernel wider
//!   than the lattice spacing;
//! - **Gaussian** ([`PropagationMethod::Gaussian`]): the predicted moments `F x̂` and
//!   `F P Fᵀ + Q` are evaluated as a Gaussian on the new grid. Exact for a Gaussian prior,
//!   but it discards any other shape of the prior.
use chrono::{DateTime, Utc};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::config::{DEFAULT_SCALE_FACTOR, PointMassConfig, PropagationMethod};
use crate::density::{GaussianDensity, gaussian_density, normalize_density};
use crate::error::{ConfigurationError, FilterError, Result};
use crate::grid::{Grid, build_grid};
use crate::lattice::{LatticeInterpolator, convolve};
use crate::linalg::symmetrize;
use crate::state::PointMassState;
use crate::transition::TransitionModel;

/// Prior points whose mass is at most this fraction of the largest mass are not propagated.
pub const MASS_PRUNING: f64 = 1e-12;
/// Lattice noise kernels are truncated at this many standard deviations along each axis.
pub const KERNEL_SPAN: f64 = 6.0;

/// Propagates a [`PointMassState`] forward in time through a [`TransitionModel`].
#[derive(Clone, Debug)]
pub struct PointMassPredictor<T: TransitionModel> {
    pub transition_model: T,
    /// Half-width of the predicted grid in standard deviations.
    pub scale_factor: f64,
    pub propagation: PropagationMethod,
}
impl<T: TransitionModel> PointMassPredictor<T> {
    pub fn new(transition_model: T) -> Self {
        PointMassPredictor {
            transition_model,
            scale_factor: DEFAULT_SCALE_FACTOR,
            propagation: PropagationMethod::Auto,
        }
    }
    pub fn with_config(transition_model: T, config: &PointMassConfig) -> Self {
        PointMassPredictor {
            transition_model,
            scale_factor: config.scale_factor,
            propagation: config.propagation,
        }
    }
    /// Predict `prior` forward to `timestamp`.
    ///
    /// The returned state lives on a new grid built around the predicted moments, with the
    /// prior's points per axis.
    ///
    /// # Errors
    /// * `Causality` if `timestamp` is not strictly after the prior's timestamp
    /// * `Configuration` if the model does not match the state dimension, the process noise
    ///   is not positive definite where a noise kernel is needed, or the predicted covariance
    ///   cannot carry a grid
    /// * `Divergence` if the predicted density vanishes on the new grid
    pub fn predict(
        &self,
        prior: &PointMassState,
        timestamp: DateTime<Utc>,
    ) -> Result<PointMassState> {
        let causality = FilterError::Causality {
            current: prior.timestamp(),
            requested: timestamp,
        };
        if timestamp <= prior.timestamp() {
            return Err(causality);
        }
        let dt = (timestamp - prior.timestamp())
            .to_std()
            .map_err(|_| causality)?
            .as_secs_f64();
        let d = prior.ndim();
        if self.transition_model.ndim_state() != d {
            return Err(ConfigurationError::DimensionMismatch {
                context: "transition model state",
                expected: d,
                found: self.transition_model.ndim_state(),
            }
            .into());
        }
        let q = self.transition_model.covar(dt);
        check_square(&q, d, "process noise")?;

        let f = match (self.propagation, self.transition_model.matrix(dt)) {
            (PropagationMethod::Convolution, _) | (_, None) => {
                return self.predict_kernel_sum(prior, &q, dt, timestamp);
            }
            (_, Some(f)) => f,
        };
        check_square(&f, d, "transition matrix")?;
        match self.propagation {
            PropagationMethod::Gaussian => self.predict_gaussian(prior, &f, &q, dt, timestamp),
            _ => self.predict_lattice(prior, &f, &q, dt, timestamp),
        }
    }

    /// Grid around the linearly predicted moments `F x̂` and `F P Fᵀ + Q`, together with
    /// the predicted covariance.
    fn predicted_grid(
        &self,
        prior: &PointMassState,
        prior_mean: &DVector<f64>,
        f: &DMatrix<f64>,
        q: &DMatrix<f64>,
        dt: f64,
    ) -> Result<(Grid, DMatrix<f64>)> {
        let mean = self.transition_model.propagate(prior_mean, dt);
        let covariance = symmetrize(&(f * prior.covar() * f.transpose() + q));
        let grid = build_grid(&mean, &covariance, self.scale_factor, prior.points_per_axis())?;
        Ok((grid, covariance))
    }

    fn predict_lattice(
        &self,
        prior: &PointMassState,
        f: &DMatrix<f64>,
        q: &DMatrix<f64>,
        dt: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PointMassState> {
        let Some(f_inv) = f.clone().try_inverse() else {
            warn!("transition matrix is singular; falling back to the kernel sum");
            return self.predict_kernel_sum(prior, q, dt, timestamp);
        };
        let d = prior.ndim();
        // Q itself must be positive definite, before it is rescaled to lattice steps.
        GaussianDensity::new(DVector::zeros(d), q)?;
        let prior_mean = prior.mean();
        let (grid, _) = self.predicted_grid(prior, &prior_mean, f, q, dt)?;

        // Pre-image of a new point y in the prior eigen-frame:
        // Vᵀ (F⁻¹ (y − c_new) + x̂ − c_prior).
        let basis_t = prior.eigen_basis().transpose();
        let to_prior_frame = &basis_t * &f_inv;
        let origin = &basis_t * (&prior_mean - prior.center());
        let lower: Vec<f64> = prior.grid_dim().iter().map(|(lo, _)| *lo).collect();
        let delta = prior.grid_delta();
        let interpolator =
            LatticeInterpolator::new(prior.weights().as_slice(), prior.points_per_axis());
        let transported: Vec<f64> = grid
            .points
            .as_slice()
            .par_chunks_exact(d)
            .map(|y| {
                let offset = DVector::from_iterator(
                    d,
                    y.iter().zip(grid.center.iter()).map(|(a, c)| a - c),
                );
                let u = &to_prior_frame * offset + &origin;
                let index: Vec<f64> = (0..d).map(|a| (u[a] - lower[a]) / delta[a]).collect();
                interpolator.value(&index)
            })
            .collect();

        // Process noise expressed in lattice steps of the new grid.
        let steps = DMatrix::from_diagonal(&grid.grid_delta.map(|v| 1.0 / v));
        let noise = symmetrize(
            &(&steps * grid.eigen_basis.transpose() * q * &grid.eigen_basis * &steps),
        );
        let kernel = GaussianDensity::new(DVector::zeros(d), &noise)?;
        let radius: Vec<usize> = prior
            .points_per_axis()
            .iter()
            .enumerate()
            .map(|(a, &n)| ((KERNEL_SPAN * noise[(a, a)].sqrt()).ceil() as usize).min(n - 1))
            .collect();
        let values = convolve(&transported, prior.points_per_axis(), &radius, |k| {
            kernel.pdf(k)
        });
        let weights = normalized(DVector::from_vec(values), grid.cell_volume())?;
        debug!(
            "lattice prediction over {dt} s onto {} points, kernel radius {radius:?}",
            grid.num_points()
        );
        Ok(PointMassState::from_grid(
            grid,
            weights,
            prior.points_per_axis().to_vec(),
            timestamp,
        ))
    }

    fn predict_gaussian(
        &self,
        prior: &PointMassState,
        f: &DMatrix<f64>,
        q: &DMatrix<f64>,
        dt: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PointMassState> {
        let (grid, covariance) = self.predicted_grid(prior, &prior.mean(), f, q, dt)?;
        let weights = gaussian_density(&grid.points, &grid.center, &covariance)?;
        let weights = normalized(weights, grid.cell_volume())?;
        debug!(
            "gaussian prediction over {dt} s onto {} points",
            grid.num_points()
        );
        Ok(PointMassState::from_grid(
            grid,
            weights,
            prior.points_per_axis().to_vec(),
            timestamp,
        ))
    }

    fn predict_kernel_sum(
        &self,
        prior: &PointMassState,
        q: &DMatrix<f64>,
        dt: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<PointMassState> {
        let d = prior.ndim();
        let masses = prior.masses();
        let max_mass = masses.max();
        if !max_mass.is_finite() || max_mass <= 0.0 {
            return Err(FilterError::Divergence {
                normalizer: masses.sum(),
            });
        }
        let cutoff = MASS_PRUNING * max_mass;
        let active: Vec<usize> = (0..masses.len()).filter(|&j| masses[j] > cutoff).collect();
        if active.len() == 1 {
            warn!("prior density has collapsed onto a single grid point");
        }

        let mapped: Vec<DVector<f64>> = active
            .par_iter()
            .map(|&j| {
                self.transition_model
                    .propagate(&prior.points().column(j).into_owned(), dt)
            })
            .collect();
        if let Some(y) = mapped.iter().find(|y| y.len() != d) {
            return Err(ConfigurationError::DimensionMismatch {
                context: "propagated state",
                expected: d,
                found: y.len(),
            }
            .into());
        }
        if mapped.iter().any(|y| y.iter().any(|v| !v.is_finite())) {
            return Err(ConfigurationError::NonFinite("propagated grid points").into());
        }
        let active_masses: Vec<f64> = active.iter().map(|&j| masses[j]).collect();
        let total: f64 = active_masses.iter().sum();

        let mut mean = DVector::<f64>::zeros(d);
        for (y, m) in mapped.iter().zip(&active_masses) {
            mean.axpy(*m, y, 1.0);
        }
        mean /= total;
        let mut covariance = DMatrix::<f64>::zeros(d, d);
        for (y, m) in mapped.iter().zip(&active_masses) {
            let diff = y - &mean;
            covariance.ger(*m, &diff, &diff, 1.0);
        }
        covariance = symmetrize(&(covariance / total + q));

        let grid = build_grid(&mean, &covariance, self.scale_factor, prior.points_per_axis())?;
        let kernel = GaussianDensity::new(DVector::zeros(d), q)?;
        let sources: Vec<f64> = mapped.iter().flat_map(|y| y.iter().copied()).collect();
        let values: Vec<f64> = grid
            .points
            .as_slice()
            .par_chunks_exact(d)
            .map(|x| {
                sources
                    .chunks_exact(d)
                    .zip(&active_masses)
                    .map(|(y, m)| m * kernel.pdf_shifted(x, y))
                    .sum::<f64>()
            })
            .collect();
        let weights = normalized(DVector::from_vec(values), grid.cell_volume())?;
        debug!(
            "kernel-sum prediction over {dt} s: {} of {} prior points onto {} points",
            active.len(),
            prior.num_points(),
            grid.num_points()
        );
        Ok(PointMassState::from_grid(
            grid,
            weights,
            prior.points_per_axis().to_vec(),
            timestamp,
        ))
    }
}

fn check_square(
    m: &DMatrix<f64>,
    d: usize,
    context: &'static str,
) -> std::result::Result<(), ConfigurationError> {
    if m.nrows() != d || m.ncols() != d {
        return Err(ConfigurationError::DimensionMismatch {
            context,
            expected: d,
            found: if m.nrows() != d { m.nrows() } else { m.ncols() },
        });
    }
    Ok(())
}

fn normalized(mut weights: DVector<f64>, cell_volume: f64) -> Result<DVector<f64>> {
    match normalize_density(&mut weights, cell_volume) {
        Some(_) => Ok(weights),
        None => Err(FilterError::Divergence {
            normalizer: weights.sum() * cell_volume,
        }),
    }
}

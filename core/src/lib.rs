//! Point-mass filter toolbox for grid-based Bayesian state estimation
//!
//! This crate provides a point-mass filter (PMF): a recursive Bayesian estimator that represents
//! the probability density of a `d`-dimensional Euclidean state by its values on a regular
//! lattice of grid points. Unlike Kalman-family filters it makes no Gaussian assumption about
//! the posterior, so it copes with strongly nonlinear or multi-modal measurement models such as
//! terrain-aided navigation, where a single height reading is consistent with whole contours of
//! positions. The price is the cost of a grid that grows exponentially with the dimension.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra tools for the filter.
//! - [`rayon`](https://crates.io/crates/rayon): Evaluates densities and likelihoods over grid points in parallel.
//! - [`rustfft`](https://crates.io/crates/rustfft): Convolves lattice densities with the process noise.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides random number generation for noisy model evaluation.
//!
//! All other functionality is auxiliary (errors, logging, configuration and result I/O).
//!
//! ## Crate overview
//!
//! - [grid]: Builds covariance-aligned lattices.
//! - [density]: Evaluates Gaussian densities over grid points and normalises density weights.
//! - [state]: The [`PointMassState`] density representation and its moments.
//! - [predictor]: Time update (Chapman–Kolmogorov) through a [`TransitionModel`].
//! - [updater]: Measurement update (Bayes' rule) through a [`MeasurementModel`].
//! - [filter]: [`PointMassFilter`], a predictor, updater and current state bundled per track.
//! - [transition] and [measurements]: model traits and the concrete models.
//! - [config]: Filter tuning and its JSON/YAML/TOML representations.
//! - [results]: Run records, CSV output, and RMSE aggregation over independent runs.
//! - [lattice]: Cubic interpolation and FFT convolution of lattice-ordered values.
//! - [linalg] and [error]: helpers and the error taxonomy.
//!
//! ## The point-mass density
//!
//! At time $k$ the density is stored as weights $w_i$ at grid points $x_i$, with
//!
//! $$
//! \sum_i w_i \, \Delta V = 1, \qquad \Delta V = \prod_j \delta_j
//! $$
//!
//! where $\delta_j$ is the lattice spacing along grid axis $j$. The grid axes are the
//! eigenvectors of a covariance matrix $P = V \Lambda V^T$, each axis spanning $\pm s \sqrt{\lambda_j}$
//! around a centre vector with an odd number of points, so the centre is always a grid point.
//! The moments follow directly:
//!
//! $$
//! \hat{x} = \sum_i w_i x_i \Delta V, \qquad
//! P = \sum_i w_i (x_i - \hat{x})(x_i - \hat{x})^T \Delta V
//! $$
//!
//! ### Prediction
//!
//! The grid is rebuilt at every prediction around the predicted mean and covariance, so it
//! follows the density instead of having to cover the whole trajectory. For linear dynamics
//! $x_{k+1} = F x_k + w_k$ the new grid is built from $F \hat{x}$ and $F P F^T + Q$. The prior
//! density is transported to it through $F$ and convolved with the process noise on the
//! lattice:
//!
//! $$
//! p(x_{k+1}) = \int \frac{p_k\left(F^{-1} y\right)}{|\det F|} \, \mathcal{N}\left(x_{k+1} - y;\, 0, Q\right) dy
//! $$
//!
//! so a multi-modal posterior stays multi-modal. For general dynamics the prior grid is mapped
//! through the dynamics and the process noise kernels are summed:
//!
//! $$
//! p(x_{k+1}) \approx \sum_j w_j \Delta V \, \mathcal{N}\left(x_{k+1};\, f(x_j), Q\right)
//! $$
//!
//! ### Update
//!
//! The measurement update multiplies each weight by the likelihood $p(z \mid x_i)$ and
//! renormalises. A normalisation constant with no probability mass means the measurement is
//! inconsistent with the whole grid; the filter reports divergence instead of producing
//! undefined weights.
//!
//! ## Example
//!
//! ```
//! use chrono::{DateTime, TimeDelta};
//! use nalgebra::{DMatrix, DVector};
//! use pointmass::{BayesianFilter, Measurement, PointMassConfig, PointMassFilter};
//! use pointmass::measurements::LinearGaussian;
//! use pointmass::transition::ConstantVelocity;
//!
//! let t0 = DateTime::from_timestamp(0, 0).unwrap();
//! let mut pmf = PointMassFilter::new(
//!     &PointMassConfig::new(vec![11, 7, 11, 7]),
//!     &DVector::from_vec(vec![0.0, 1.0, 0.0, 1.0]),
//!     &DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 0.25, 4.0, 0.25])),
//!     t0,
//!     ConstantVelocity::new(vec![0.1, 0.1]),
//!     LinearGaussian::new(4, vec![0, 2], DMatrix::identity(2, 2)),
//! )
//! .unwrap();
//! let z = Measurement::new(DVector::from_vec(vec![1.2, 0.9]), t0 + TimeDelta::seconds(1));
//! pmf.step(&z).unwrap();
//! assert_eq!(pmf.get_estimate().len(), 4);
//! ```
pub mod config;
pub mod density;
pub mod error;
pub mod filter;
pub mod grid;
pub mod lattice;
pub mod linalg;
pub mod measurements;
pub mod predictor;
pub mod results;
pub mod state;
pub mod transition;
pub mod updater;

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};

pub use config::{PointMassConfig, PropagationMethod};
pub use error::{ConfigurationError, FilterError};
pub use filter::PointMassFilter;
pub use measurements::{Measurement, MeasurementModel};
pub use predictor::PointMassPredictor;
pub use state::PointMassState;
pub use transition::TransitionModel;
pub use updater::PointMassUpdater;

/// Generic recursive Bayesian filter interface
///
/// Filters move forward in time only. `predict` advances the density to a later time and
/// `update` conditions it on a measurement; on error the filter state is left unchanged.
pub trait BayesianFilter {
    fn predict(&mut self, timestamp: DateTime<Utc>) -> error::Result<()>;
    fn update(&mut self, measurement: &Measurement) -> error::Result<()>;
    fn get_estimate(&self) -> DVector<f64>;
    fn get_certainty(&self) -> DMatrix<f64>;
}

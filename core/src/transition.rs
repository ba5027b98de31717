//! State transition models consumed by the predictor.
//!
//! Every model is of the additive-noise form
//!
//! $$
//! x_{k+1} = f(x_k, \Delta t) + w_k, \qquad w_k \sim \mathcal{N}(0, Q(\Delta t))
//! $$
//!
//! Models whose deterministic part is linear, `f(x) = F(Δt) x`, expose `F` through
//! [`TransitionModel::matrix`] so that the predictor can transport the density through `F` and
//! convolve it with the noise on the lattice. Everything else goes through the kernel sum.
use nalgebra::{DMatrix, DVector};

use crate::linalg::sample_gaussian;

/// Turn rates below this magnitude (rad/s) are treated as straight-line motion.
pub const TURN_RATE_EPSILON: f64 = 1e-10;

/// A Markov transition density with additive Gaussian noise.
pub trait TransitionModel: Send + Sync {
    /// Dimension of the state the model acts on.
    fn ndim_state(&self) -> usize;
    /// Deterministic part of the transition, `f(x, dt)`.
    fn propagate(&self, state: &DVector<f64>, dt: f64) -> DVector<f64>;
    /// Process noise covariance accumulated over `dt` seconds.
    fn covar(&self, dt: f64) -> DMatrix<f64>;
    /// Transition matrix `F(dt)` when the deterministic part is linear. `None` by default.
    fn matrix(&self, _dt: f64) -> Option<DMatrix<f64>> {
        None
    }
    /// Propagate `state`, optionally adding a process noise sample.
    fn function(&self, state: &DVector<f64>, add_noise: bool, dt: f64) -> DVector<f64> {
        let mut next = self.propagate(state, dt);
        if add_noise {
            next += sample_gaussian(&self.covar(dt), &mut rand::rng());
        }
        next
    }
}

/// Continuous white noise acceleration block `[[dt³/3, dt²/2], [dt²/2, dt]]`.
fn white_noise_acceleration_block(dt: f64) -> [[f64; 2]; 2] {
    [
        [dt.powi(3) / 3.0, dt.powi(2) / 2.0],
        [dt.powi(2) / 2.0, dt],
    ]
}

/// Brownian motion in every component: `F = I`, `Q = diag(q) dt`.
#[derive(Clone, Debug)]
pub struct RandomWalk {
    pub noise_diff_coeffs: Vec<f64>,
}
impl RandomWalk {
    pub fn new(noise_diff_coeffs: Vec<f64>) -> Self {
        RandomWalk { noise_diff_coeffs }
    }
}
impl TransitionModel for RandomWalk {
    fn ndim_state(&self) -> usize {
        self.noise_diff_coeffs.len()
    }
    fn propagate(&self, state: &DVector<f64>, _dt: f64) -> DVector<f64> {
        state.clone()
    }
    fn covar(&self, dt: f64) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_iterator(
            self.noise_diff_coeffs.len(),
            self.noise_diff_coeffs.iter().map(|q| q * dt),
        ))
    }
    fn matrix(&self, _dt: f64) -> Option<DMatrix<f64>> {
        let n = self.ndim_state();
        Some(DMatrix::identity(n, n))
    }
}

/// Nearly constant velocity motion.
///
/// The state is a stack of `[position, velocity]` pairs, one per entry of
/// `noise_diff_coeffs`, e.g. `[x, vx, y, vy]` for two coefficients.
#[derive(Clone, Debug)]
pub struct ConstantVelocity {
    pub noise_diff_coeffs: Vec<f64>,
}
impl ConstantVelocity {
    pub fn new(noise_diff_coeffs: Vec<f64>) -> Self {
        ConstantVelocity { noise_diff_coeffs }
    }
    fn transition_matrix(&self, dt: f64) -> DMatrix<f64> {
        let n = self.ndim_state();
        let mut f = DMatrix::identity(n, n);
        for block in 0..self.noise_diff_coeffs.len() {
            f[(2 * block, 2 * block + 1)] = dt;
        }
        f
    }
}
impl TransitionModel for ConstantVelocity {
    fn ndim_state(&self) -> usize {
        2 * self.noise_diff_coeffs.len()
    }
    fn propagate(&self, state: &DVector<f64>, dt: f64) -> DVector<f64> {
        self.transition_matrix(dt) * state
    }
    fn covar(&self, dt: f64) -> DMatrix<f64> {
        let n = self.ndim_state();
        let c = white_noise_acceleration_block(dt);
        let mut q = DMatrix::zeros(n, n);
        for (block, coeff) in self.noise_diff_coeffs.iter().enumerate() {
            for i in 0..2 {
                for j in 0..2 {
                    q[(2 * block + i, 2 * block + j)] = coeff * c[i][j];
                }
            }
        }
        q
    }
    fn matrix(&self, dt: f64) -> Option<DMatrix<f64>> {
        Some(self.transition_matrix(dt))
    }
}

/// Coordinated turn at a known, constant turn rate in the plane.
///
/// State `[x, vx, y, vy]`, turn rate `ω` in rad/s (counter-clockwise positive). With
/// `s = sin(ω dt)` and `c = cos(ω dt)` the transition matrix is
///
/// ```text
/// | 1   s/ω       0   (c-1)/ω |
/// | 0   c         0   -s      |
/// | 0   (1-c)/ω   1   s/ω     |
/// | 0   s         0   c       |
/// ```
///
/// and the process noise is `blockdiag(q1 C(dt), q2 C(dt))`, `C` the white noise
/// acceleration block.
#[derive(Clone, Debug)]
pub struct KnownTurnRate {
    pub turn_noise_diff_coeffs: [f64; 2],
    pub turn_rate: f64,
}
impl KnownTurnRate {
    pub fn new(turn_noise_diff_coeffs: [f64; 2], turn_rate: f64) -> Self {
        KnownTurnRate {
            turn_noise_diff_coeffs,
            turn_rate,
        }
    }
    fn transition_matrix(&self, dt: f64) -> DMatrix<f64> {
        let w = self.turn_rate;
        if w.abs() < TURN_RATE_EPSILON {
            return DMatrix::from_row_slice(
                4,
                4,
                &[
                    1.0, dt, 0.0, 0.0, //
                    0.0, 1.0, 0.0, 0.0, //
                    0.0, 0.0, 1.0, dt, //
                    0.0, 0.0, 0.0, 1.0,
                ],
            );
        }
        let (s, c) = (w * dt).sin_cos();
        DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, s / w, 0.0, (c - 1.0) / w, //
                0.0, c, 0.0, -s, //
                0.0, (1.0 - c) / w, 1.0, s / w, //
                0.0, s, 0.0, c,
            ],
        )
    }
}
impl TransitionModel for KnownTurnRate {
    fn ndim_state(&self) -> usize {
        4
    }
    fn propagate(&self, state: &DVector<f64>, dt: f64) -> DVector<f64> {
        self.transition_matrix(dt) * state
    }
    fn covar(&self, dt: f64) -> DMatrix<f64> {
        let c = white_noise_acceleration_block(dt);
        let mut q = DMatrix::zeros(4, 4);
        for (block, coeff) in self.turn_noise_diff_coeffs.iter().enumerate() {
            for i in 0..2 {
                for j in 0..2 {
                    q[(2 * block + i, 2 * block + j)] = coeff * c[i][j];
                }
            }
        }
        q
    }
    fn matrix(&self, dt: f64) -> Option<DMatrix<f64>> {
        Some(self.transition_matrix(dt))
    }
}

/// Arbitrary deterministic dynamics with noise `Q = noise_rate · dt`.
///
/// No transition matrix is exposed, so prediction always takes the convolution path.
pub struct AdditiveGaussianTransition<F>
where
    F: Fn(&DVector<f64>, f64) -> DVector<f64> + Send + Sync,
{
    ndim: usize,
    function: F,
    noise_rate: DMatrix<f64>,
}
impl<F> AdditiveGaussianTransition<F>
where
    F: Fn(&DVector<f64>, f64) -> DVector<f64> + Send + Sync,
{
    pub fn new(ndim: usize, function: F, noise_rate: DMatrix<f64>) -> Self {
        AdditiveGaussianTransition {
            ndim,
            function,
            noise_rate,
        }
    }
}
impl<F> TransitionModel for AdditiveGaussianTransition<F>
where
    F: Fn(&DVector<f64>, f64) -> DVector<f64> + Send + Sync,
{
    fn ndim_state(&self) -> usize {
        self.ndim
    }
    fn propagate(&self, state: &DVector<f64>, dt: f64) -> DVector<f64> {
        (self.function)(state, dt)
    }
    fn covar(&self, dt: f64) -> DMatrix<f64> {
        &self.noise_rate * dt
    }
}

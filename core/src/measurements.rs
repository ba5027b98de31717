//! Measurement-related code for the point-mass filter.
//!
//! This module defines the [`MeasurementModel`] trait consumed by the updater, the
//! [`Measurement`] record it is applied to, and the two concrete models used with the filter:
//! a linear-Gaussian observation of selected state components and a scalar terrain-height
//! observation for terrain-aided navigation.
//!
//! Models are evaluated at every grid point, so they must be `Send + Sync`.
use std::fmt::{self, Debug, Display};

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::density::GaussianDensity;
use crate::error::ConfigurationError;
use crate::linalg::sample_gaussian;

/// A detection: a measurement vector and its time of validity.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub vector: DVector<f64>,
    pub timestamp: DateTime<Utc>,
}
impl Measurement {
    pub fn new(vector: DVector<f64>, timestamp: DateTime<Utc>) -> Self {
        Measurement { vector, timestamp }
    }
}
impl Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Measurement(t: {}, z: {:?})",
            self.timestamp.to_rfc3339(),
            self.vector.as_slice()
        )
    }
}

/// Generic measurement model trait for all types of measurements
pub trait MeasurementModel: Send + Sync {
    /// Get the dimension of the measurement vector
    fn get_dimension(&self) -> usize;
    /// Get the dimension of the state the model observes
    fn get_state_dimension(&self) -> usize;
    /// Indices of the state components the measurement depends on
    fn get_mapping(&self) -> &[usize];
    /// Get the measurement noise covariance
    fn get_noise(&self) -> DMatrix<f64>;
    /// Get the expected measurement for a state. `None` where the model is undefined, e.g.
    /// a position outside the terrain map.
    fn get_expected_measurement(&self, state: &DVector<f64>) -> Option<DVector<f64>>;
    /// Check that every mapped index addresses a component of the state.
    fn validate_mapping(&self) -> Result<(), ConfigurationError> {
        let ndim = self.get_state_dimension();
        match self.get_mapping().iter().find(|&&i| i >= ndim) {
            Some(&index) => Err(ConfigurationError::MappingOutOfRange { index, ndim }),
            None => Ok(()),
        }
    }
    /// Expected measurement, optionally corrupted by a noise sample.
    fn function(&self, state: &DVector<f64>, add_noise: bool) -> Option<DVector<f64>> {
        let mut z = self.get_expected_measurement(state)?;
        if add_noise {
            z += sample_gaussian(&self.get_noise(), &mut rand::rng());
        }
        Some(z)
    }
    /// Likelihood `N(z; h(x), R)` of `measurement` at each column of `states`.
    ///
    /// Columns where the expected measurement is undefined get likelihood zero.
    fn likelihood(
        &self,
        measurement: &DVector<f64>,
        states: &DMatrix<f64>,
    ) -> Result<DVector<f64>, ConfigurationError> {
        if measurement.len() != self.get_dimension() {
            return Err(ConfigurationError::DimensionMismatch {
                context: "measurement vector",
                expected: self.get_dimension(),
                found: measurement.len(),
            });
        }
        if states.nrows() != self.get_state_dimension() {
            return Err(ConfigurationError::DimensionMismatch {
                context: "measurement model state",
                expected: self.get_state_dimension(),
                found: states.nrows(),
            });
        }
        self.validate_mapping()?;
        // The Gaussian is symmetric in z and h(x), so centre it on the measurement.
        let density = GaussianDensity::new(measurement.clone(), &self.get_noise())?;
        let d = states.nrows();
        let values: Vec<f64> = states
            .as_slice()
            .par_chunks_exact(d)
            .map(|x| {
                self.get_expected_measurement(&DVector::from_column_slice(x))
                    .map_or(0.0, |h| density.pdf(h.as_slice()))
            })
            .collect();
        Ok(DVector::from_vec(values))
    }
}

/// Linear observation of selected state components with Gaussian noise.
#[derive(Clone, Debug)]
pub struct LinearGaussian {
    pub ndim_state: usize,
    pub mapping: Vec<usize>,
    pub noise_covar: DMatrix<f64>,
}
impl LinearGaussian {
    pub fn new(ndim_state: usize, mapping: Vec<usize>, noise_covar: DMatrix<f64>) -> Self {
        LinearGaussian {
            ndim_state,
            mapping,
            noise_covar,
        }
    }
    /// The `m × n` selection matrix `H`.
    ///
    /// # Panics
    /// If a mapping index is not below `ndim_state`; see
    /// [`MeasurementModel::validate_mapping`].
    pub fn matrix(&self) -> DMatrix<f64> {
        let mut h = DMatrix::zeros(self.mapping.len(), self.ndim_state);
        for (row, &col) in self.mapping.iter().enumerate() {
            h[(row, col)] = 1.0;
        }
        h
    }
}
impl Display for LinearGaussian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LinearGaussian(state dim: {}, mapping: {:?})",
            self.ndim_state, self.mapping
        )
    }
}
impl MeasurementModel for LinearGaussian {
    fn get_dimension(&self) -> usize {
        self.mapping.len()
    }
    fn get_state_dimension(&self) -> usize {
        self.ndim_state
    }
    fn get_mapping(&self) -> &[usize] {
        &self.mapping
    }
    fn get_noise(&self) -> DMatrix<f64> {
        self.noise_covar.clone()
    }
    fn get_expected_measurement(&self, state: &DVector<f64>) -> Option<DVector<f64>> {
        Some(DVector::from_iterator(
            self.mapping.len(),
            self.mapping.iter().map(|&i| state[i]),
        ))
    }
}

/// Source of terrain heights for [`TerrainAidedNavigation`].
///
/// Returns `None` outside the map. Implemented for any `Fn(f64, f64) -> Option<f64>`.
pub trait TerrainMap: Send + Sync {
    fn height(&self, x: f64, y: f64) -> Option<f64>;
}
impl<F> TerrainMap for F
where
    F: Fn(f64, f64) -> Option<f64> + Send + Sync,
{
    fn height(&self, x: f64, y: f64) -> Option<f64> {
        self(x, y)
    }
}

/// Scalar terrain-height measurement at the horizontal position of the state.
///
/// `mapping` names the state indices of the two horizontal coordinates, `[0, 2]` for an
/// `[x, vx, y, vy]` state.
pub struct TerrainAidedNavigation<T: TerrainMap> {
    pub terrain: T,
    pub mapping: [usize; 2],
    pub noise_variance: f64,
    pub ndim_state: usize,
}
impl<T: TerrainMap> TerrainAidedNavigation<T> {
    pub fn new(terrain: T, ndim_state: usize, mapping: [usize; 2], noise_variance: f64) -> Self {
        TerrainAidedNavigation {
            terrain,
            mapping,
            noise_variance,
            ndim_state,
        }
    }
}
impl<T: TerrainMap> Debug for TerrainAidedNavigation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerrainAidedNavigation")
            .field("mapping", &self.mapping)
            .field("noise_variance", &self.noise_variance)
            .field("ndim_state", &self.ndim_state)
            .finish_non_exhaustive()
    }
}
impl<T: TerrainMap> MeasurementModel for TerrainAidedNavigation<T> {
    fn get_dimension(&self) -> usize {
        1
    }
    fn get_state_dimension(&self) -> usize {
        self.ndim_state
    }
    fn get_mapping(&self) -> &[usize] {
        &self.mapping
    }
    fn get_noise(&self) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, self.noise_variance)
    }
    fn get_expected_measurement(&self, state: &DVector<f64>) -> Option<DVector<f64>> {
        let [ix, iy] = self.mapping;
        self.terrain
            .height(state[ix], state[iy])
            .map(|h| DVector::from_element(1, h))
    }
}

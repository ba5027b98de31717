//! Measurement update of the point-mass filter.
//!
//! Bayes' rule on the grid: the predicted density at every point is multiplied by the
//! measurement likelihood and the product is renormalised,
//!
//! $$
//! p(x_i \mid z) = \frac{p(z \mid x_i)\, p(x_i)}{\sum_j p(z \mid x_j)\, p(x_j)\, \Delta V}
//! $$
//!
//! The grid itself is not touched; the posterior shares points, basis, and spacing with the
//! prediction it was computed from.
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::config::{DEFAULT_DIVERGENCE_THRESHOLD, PointMassConfig};
use crate::error::{ConfigurationError, FilterError, Result};
use crate::measurements::{Measurement, MeasurementModel};
use crate::state::PointMassState;

/// Predicted measurement moments over a point-mass density.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementPrediction {
    pub mean: DVector<f64>,
    /// Spread of the expected measurement plus the measurement noise.
    pub covariance: DMatrix<f64>,
}

/// Applies measurements to a [`PointMassState`] through a [`MeasurementModel`].
#[derive(Clone, Debug)]
pub struct PointMassUpdater<M: MeasurementModel> {
    pub measurement_model: M,
    /// Normalisation constants at or below this value are reported as divergence.
    pub divergence_threshold: f64,
}
impl<M: MeasurementModel> PointMassUpdater<M> {
    pub fn new(measurement_model: M) -> Self {
        PointMassUpdater {
            measurement_model,
            divergence_threshold: DEFAULT_DIVERGENCE_THRESHOLD,
        }
    }
    pub fn with_config(measurement_model: M, config: &PointMassConfig) -> Self {
        PointMassUpdater {
            measurement_model,
            divergence_threshold: config.divergence_threshold,
        }
    }
    /// Condition `prediction` on `measurement`.
    ///
    /// The posterior carries the measurement timestamp and the prediction's grid.
    ///
    /// # Errors
    /// * `Configuration` if the measurement or model dimensions do not match the state
    /// * `Divergence` if the measurement is incompatible with every grid point, i.e. the
    ///   normalisation constant is not finite or at most the divergence threshold
    pub fn update(
        &self,
        prediction: &PointMassState,
        measurement: &Measurement,
    ) -> Result<PointMassState> {
        if measurement.timestamp != prediction.timestamp() {
            warn!(
                "measurement at {} applied to a prediction at {}",
                measurement.timestamp,
                prediction.timestamp()
            );
        }
        let likelihood = self
            .measurement_model
            .likelihood(&measurement.vector, prediction.points())?;
        let weights = prediction.weights().component_mul(&likelihood);
        let normalizer = weights.sum() * prediction.cell_volume();
        if !normalizer.is_finite() || normalizer <= self.divergence_threshold {
            return Err(FilterError::Divergence { normalizer });
        }
        debug!("update at {}: normalizer {normalizer:e}", measurement.timestamp);
        Ok(prediction.with_weights(weights / normalizer, measurement.timestamp))
    }
    /// Predicted measurement mean and covariance over the grid.
    ///
    /// Grid points where the expected measurement is undefined are skipped. Returns `None`
    /// if that leaves no probability mass.
    pub fn predict_measurement(
        &self,
        prediction: &PointMassState,
    ) -> std::result::Result<Option<MeasurementPrediction>, ConfigurationError> {
        let model = &self.measurement_model;
        if model.get_state_dimension() != prediction.ndim() {
            return Err(ConfigurationError::DimensionMismatch {
                context: "measurement model state",
                expected: prediction.ndim(),
                found: model.get_state_dimension(),
            });
        }
        model.validate_mapping()?;
        let m = model.get_dimension();
        let masses = prediction.masses();
        let expected: Vec<(f64, DVector<f64>)> = prediction
            .points()
            .column_iter()
            .zip(masses.iter())
            .filter_map(|(x, w)| {
                model
                    .get_expected_measurement(&x.into_owned())
                    .map(|z| (*w, z))
            })
            .collect();
        let total: f64 = expected.iter().map(|(w, _)| w).sum();
        if !(total > 0.0) {
            return Ok(None);
        }
        let mut mean = DVector::<f64>::zeros(m);
        for (w, z) in &expected {
            mean.axpy(*w / total, z, 1.0);
        }
        let mut covariance = model.get_noise();
        for (w, z) in &expected {
            let diff = z - &mean;
            covariance.ger(*w / total, &diff, &diff, 1.0);
        }
        Ok(Some(MeasurementPrediction { mean, covariance }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::{LinearGaussian, TerrainAidedNavigation};
    use assert_approx_eq::assert_approx_eq;
    use chrono::{DateTime, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn standard_prior() -> PointMassState {
        PointMassState::from_gaussian(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            4.0,
            &[21, 21],
            t0(),
        )
        .unwrap()
    }

    #[test]
    fn update_at_the_mean_concentrates_weight() {
        let prior = standard_prior();
        let updater = PointMassUpdater::new(LinearGaussian::new(
            2,
            vec![0, 1],
            DMatrix::identity(2, 2) * 0.5,
        ));
        let z = Measurement::new(DVector::zeros(2), t0());
        let posterior = updater.update(&prior, &z).unwrap();
        assert_approx_eq!(posterior.total_probability(), 1.0, 1e-9);
        let p = posterior.covar();
        // Information form: 1 / (1 + 2) per axis.
        assert_approx_eq!(p[(0, 0)], 1.0 / 3.0, 0.01);
        assert_approx_eq!(p[(1, 1)], 1.0 / 3.0, 0.01);
        let m = posterior.mean();
        assert_approx_eq!(m[0], 0.0, 1e-9);
        assert_approx_eq!(m[1], 0.0, 1e-9);
        assert_eq!(posterior.points(), prior.points());
        let centre = 220;
        assert!(posterior.weights()[centre] > prior.weights()[centre]);
    }

    #[test]
    fn update_shifts_mean_toward_measurement() {
        let prior = standard_prior();
        let updater = PointMassUpdater::new(LinearGaussian::new(
            2,
            vec![0],
            DMatrix::from_element(1, 1, 1.0),
        ));
        let t1 = t0() + chrono::TimeDelta::seconds(1);
        let posterior = updater
            .update(&prior, &Measurement::new(DVector::from_vec(vec![1.0]), t1))
            .unwrap();
        let m = posterior.mean();
        assert_approx_eq!(m[0], 0.5, 0.01);
        assert_approx_eq!(m[1], 0.0, 1e-9);
        assert_eq!(posterior.timestamp(), t1);
    }

    #[test]
    fn far_measurement_diverges() {
        let prior = standard_prior();
        let updater = PointMassUpdater::new(LinearGaussian::new(
            2,
            vec![0, 1],
            DMatrix::identity(2, 2) * 0.01,
        ));
        let z = Measurement::new(DVector::from_vec(vec![1e4, -1e4]), t0());
        assert!(matches!(
            updater.update(&prior, &z),
            Err(FilterError::Divergence { .. })
        ));
    }

    #[test]
    fn measurement_off_the_map_diverges() {
        let prior = standard_prior();
        let updater = PointMassUpdater::new(TerrainAidedNavigation::new(
            |x: f64, _y: f64| if x > 100.0 { Some(1.0) } else { None },
            2,
            [0, 1],
            1.0,
        ));
        let z = Measurement::new(DVector::from_vec(vec![1.0]), t0());
        assert_eq!(
            updater.update(&prior, &z).unwrap_err(),
            FilterError::Divergence { normalizer: 0.0 }
        );
        assert!(updater.predict_measurement(&prior).unwrap().is_none());
    }

    #[test]
    fn wrong_measurement_dimension_is_configuration_error() {
        let updater = PointMassUpdater::new(LinearGaussian::new(
            2,
            vec![0, 1],
            DMatrix::identity(2, 2),
        ));
        let z = Measurement::new(DVector::zeros(3), t0());
        assert!(matches!(
            updater.update(&standard_prior(), &z),
            Err(FilterError::Configuration(_))
        ));
    }

    #[test]
    fn mapping_outside_the_state_is_configuration_error() {
        let updater = PointMassUpdater::new(LinearGaussian::new(
            2,
            vec![5],
            DMatrix::identity(1, 1),
        ));
        let z = Measurement::new(DVector::zeros(1), t0());
        let expected = ConfigurationError::MappingOutOfRange { index: 5, ndim: 2 };
        assert_eq!(
            updater.update(&standard_prior(), &z).unwrap_err(),
            FilterError::Configuration(expected.clone())
        );
        assert_eq!(
            updater.predict_measurement(&standard_prior()).unwrap_err(),
            expected
        );
    }

    #[test]
    fn predicted_measurement_moments() {
        let prior = standard_prior();
        let updater = PointMassUpdater::new(LinearGaussian::new(
            2,
            vec![1],
            DMatrix::from_element(1, 1, 0.25),
        ));
        let pred = updater.predict_measurement(&prior).unwrap().unwrap();
        assert_approx_eq!(pred.mean[0], 0.0, 1e-9);
        // Unit prior variance (truncated at four sigma) plus the noise.
        assert_approx_eq!(pred.covariance[(0, 0)], 1.25, 0.01);
    }
}

//! Recursive point-mass filter
//!
//! This module ties a [`PointMassPredictor`] and a [`PointMassUpdater`] to a current
//! [`PointMassState`] and exposes them through the crate-level [`BayesianFilter`] interface.
//! The filter only moves forward in time: a measurement earlier than the current state is a
//! causality error, a measurement at the current time is applied directly, and anything later
//! first triggers a prediction to the measurement time.
//!
//! A failed prediction or update leaves the current state as it was before the call.
use chrono::{DateTime, Utc};
use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::BayesianFilter;
use crate::config::PointMassConfig;
use crate::error::{FilterError, Result};
use crate::measurements::{Measurement, MeasurementModel};
use crate::predictor::PointMassPredictor;
use crate::state::PointMassState;
use crate::transition::TransitionModel;
use crate::updater::{MeasurementPrediction, PointMassUpdater};

/// A point-mass filter for one track.
#[derive(Clone, Debug)]
pub struct PointMassFilter<T: TransitionModel, M: MeasurementModel> {
    pub predictor: PointMassPredictor<T>,
    pub updater: PointMassUpdater<M>,
    state: PointMassState,
}
impl<T: TransitionModel, M: MeasurementModel> PointMassFilter<T, M> {
    /// Build a filter from a Gaussian prior.
    ///
    /// # Arguments
    /// * `config` - grid resolution and tuning; validated against the prior dimension
    /// * `mean` - prior mean
    /// * `covariance` - prior covariance
    /// * `timestamp` - time of validity of the prior
    /// * `transition_model` - dynamics used by the predictor
    /// * `measurement_model` - sensor model used by the updater
    pub fn new(
        config: &PointMassConfig,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
        timestamp: DateTime<Utc>,
        transition_model: T,
        measurement_model: M,
    ) -> Result<Self> {
        config.validate(mean.len())?;
        let state = PointMassState::from_gaussian(
            mean,
            covariance,
            config.scale_factor,
            &config.points_per_axis,
            timestamp,
        )?;
        Ok(PointMassFilter {
            predictor: PointMassPredictor::with_config(transition_model, config),
            updater: PointMassUpdater::with_config(measurement_model, config),
            state,
        })
    }
    pub fn state(&self) -> &PointMassState {
        &self.state
    }
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.state.timestamp()
    }
    /// Process one measurement: predict to its time if needed, then update.
    pub fn step(&mut self, measurement: &Measurement) -> Result<()> {
        let current = self.state.timestamp();
        if measurement.timestamp < current {
            return Err(FilterError::Causality {
                current,
                requested: measurement.timestamp,
            });
        }
        let posterior = if measurement.timestamp > current {
            let prediction = self.predictor.predict(&self.state, measurement.timestamp)?;
            self.updater.update(&prediction, measurement)?
        } else {
            self.updater.update(&self.state, measurement)?
        };
        debug!("{posterior}");
        self.state = posterior;
        Ok(())
    }
    /// Predicted measurement moments at the current state.
    pub fn predict_measurement(&self) -> Result<Option<MeasurementPrediction>> {
        Ok(self.updater.predict_measurement(&self.state)?)
    }
}
impl<T: TransitionModel, M: MeasurementModel> BayesianFilter for PointMassFilter<T, M> {
    fn predict(&mut self, timestamp: DateTime<Utc>) -> Result<()> {
        self.state = self.predictor.predict(&self.state, timestamp)?;
        Ok(())
    }
    fn update(&mut self, measurement: &Measurement) -> Result<()> {
        self.state = self.updater.update(&self.state, measurement)?;
        Ok(())
    }
    fn get_estimate(&self) -> DVector<f64> {
        self.state.mean()
    }
    fn get_certainty(&self) -> DMatrix<f64> {
        self.state.covar()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::LinearGaussian;
    use crate::transition::RandomWalk;
    use assert_approx_eq::assert_approx_eq;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn filter() -> PointMassFilter<RandomWalk, LinearGaussian> {
        PointMassFilter::new(
            &PointMassConfig::new(vec![21, 21]),
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            t0(),
            RandomWalk::new(vec![0.1, 0.1]),
            LinearGaussian::new(2, vec![0, 1], DMatrix::identity(2, 2)),
        )
        .unwrap()
    }

    #[test]
    fn step_predicts_then_updates() {
        let mut pmf = filter();
        let t1 = t0() + TimeDelta::seconds(1);
        pmf.step(&Measurement::new(DVector::from_vec(vec![1.0, -1.0]), t1))
            .unwrap();
        assert_eq!(pmf.timestamp(), t1);
        // Prior variance 1.1 after prediction, unit measurement noise.
        let gain = 1.1 / 2.1;
        let estimate = pmf.get_estimate();
        assert_approx_eq!(estimate[0], gain, 0.01);
        assert_approx_eq!(estimate[1], -gain, 0.01);
        assert_approx_eq!(pmf.get_certainty()[(0, 0)], 1.1 / 2.1, 0.02);
    }

    #[test]
    fn step_at_current_time_only_updates() {
        let mut pmf = filter();
        let points = pmf.state().points().clone();
        pmf.step(&Measurement::new(DVector::zeros(2), t0())).unwrap();
        assert_eq!(pmf.state().points(), &points);
        assert_approx_eq!(pmf.get_certainty()[(0, 0)], 0.5, 0.01);
    }

    #[test]
    fn failed_steps_leave_state_unchanged() {
        let mut pmf = filter();
        let before = pmf.state().weights().clone();
        let late = Measurement::new(DVector::zeros(2), t0() - TimeDelta::seconds(1));
        assert!(matches!(
            pmf.step(&late),
            Err(FilterError::Causality { .. })
        ));
        let far = Measurement::new(
            DVector::from_vec(vec![1e5, 1e5]),
            t0() + TimeDelta::seconds(1),
        );
        assert!(matches!(
            pmf.step(&far),
            Err(FilterError::Divergence { .. })
        ));
        assert_eq!(pmf.state().weights(), &before);
        assert_eq!(pmf.timestamp(), t0());
    }

    #[test]
    fn bayesian_filter_interface() {
        let mut pmf = filter();
        let t1 = t0() + TimeDelta::seconds(2);
        pmf.predict(t1).unwrap();
        assert_approx_eq!(pmf.get_certainty()[(1, 1)], 1.2, 0.01);
        pmf.update(&Measurement::new(DVector::zeros(2), t1)).unwrap();
        assert!(pmf.get_certainty()[(1, 1)] < 1.0);
        assert!(pmf.predict(t1).is_err());
        let z = pmf.predict_measurement().unwrap().unwrap();
        assert_eq!(z.mean.len(), 2);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let err = PointMassFilter::new(
            &PointMassConfig::new(vec![21]),
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            t0(),
            RandomWalk::new(vec![0.1, 0.1]),
            LinearGaussian::new(2, vec![0, 1], DMatrix::identity(2, 2)),
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Configuration(_)));
    }
}

//! Error taxonomy for the point-mass filter.
//!
//! Every failure is a deterministic function of the inputs and is returned once to the direct
//! caller of the operation. Nothing in the crate retries or substitutes a previous state.
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Invalid filter configuration: bad dimensions, covariances, or lattice resolution.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{context} must be square, found {rows}x{cols}")]
    NotSquare {
        context: &'static str,
        rows: usize,
        cols: usize,
    },
    #[error("covariance is not positive definite (eigenvalue {eigenvalue:e})")]
    NotPositiveDefinite { eigenvalue: f64 },
    #[error("covariance has no extent along grid axis {axis}")]
    DegenerateAxis { axis: usize },
    #[error("points per axis must be odd and at least 3; axis {axis} has {points}")]
    InvalidPointsPerAxis { axis: usize, points: usize },
    #[error("scale factor must be finite and positive, found {0}")]
    InvalidScaleFactor(f64),
    #[error("grid with points per axis {0:?} does not fit in memory")]
    GridTooLarge(Vec<usize>),
    #[error("measurement mapping index {index} is out of range for a {ndim}-dimensional state")]
    MappingOutOfRange { index: usize, ndim: usize },
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
    #[error("divergence threshold must be finite and non-negative, found {0}")]
    InvalidThreshold(f64),
}

/// Errors returned by prediction and update.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum FilterError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("cannot predict to {requested}: state is already at {current}")]
    Causality {
        current: DateTime<Utc>,
        requested: DateTime<Utc>,
    },
    #[error("filter diverged: normalization constant {normalizer:e} carries no probability mass")]
    Divergence { normalizer: f64 },
}

pub type Result<T> = std::result::Result<T, FilterError>;

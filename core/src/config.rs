//! Filter configuration and its file formats.
//!
//! A [`PointMassConfig`] gathers the tuning knobs of the predictor and updater. It can be
//! stored as JSON, YAML, or TOML; [`PointMassConfig::from_file`] and
//! [`PointMassConfig::to_file`] pick the format from the file extension.
//!
//! ```
//! use pointmass::config::{PointMassConfig, PropagationMethod};
//!
//! let cfg = PointMassConfig::new(vec![33, 33, 33, 33]);
//! assert_eq!(cfg.scale_factor, 4.0);
//! assert_eq!(cfg.propagation, PropagationMethod::Auto);
//! assert!(cfg.validate(4).is_ok());
//! ```
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::grid::{total_points, validate_points_per_axis, validate_scale_factor};

pub const DEFAULT_SCALE_FACTOR: f64 = 4.0;
pub const DEFAULT_DIVERGENCE_THRESHOLD: f64 = 1e-300;

/// How the predictor propagates the density through the transition model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMethod {
    /// Transport the density through the transition matrix and convolve it with the process
    /// noise on the lattice when the model exposes a matrix, kernel sum otherwise.
    #[default]
    Auto,
    /// Always propagate by summing noise kernels centred on the mapped grid points.
    Convolution,
    /// Evaluate the linearly predicted mean and covariance as a Gaussian. Only exact for a
    /// Gaussian prior; falls back to the kernel sum for models without a matrix.
    Gaussian,
}

fn default_scale_factor() -> f64 {
    DEFAULT_SCALE_FACTOR
}
fn default_divergence_threshold() -> f64 {
    DEFAULT_DIVERGENCE_THRESHOLD
}

/// Tuning of a point-mass filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointMassConfig {
    /// Grid half-width in standard deviations.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    /// Lattice resolution per state axis; odd, at least 3.
    pub points_per_axis: Vec<usize>,
    #[serde(default)]
    pub propagation: PropagationMethod,
    /// Measurement updates whose normalisation constant is at or below this are divergent.
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: f64,
}
impl PointMassConfig {
    pub fn new(points_per_axis: Vec<usize>) -> Self {
        PointMassConfig {
            scale_factor: DEFAULT_SCALE_FACTOR,
            points_per_axis,
            propagation: PropagationMethod::Auto,
            divergence_threshold: DEFAULT_DIVERGENCE_THRESHOLD,
        }
    }
    /// Check the configuration against a state dimension.
    pub fn validate(&self, ndim: usize) -> Result<(), ConfigurationError> {
        validate_points_per_axis(&self.points_per_axis, ndim)?;
        validate_scale_factor(self.scale_factor)?;
        total_points(&self.points_per_axis)?;
        if !self.divergence_threshold.is_finite() || self.divergence_threshold < 0.0 {
            return Err(ConfigurationError::InvalidThreshold(
                self.divergence_threshold,
            ));
        }
        Ok(())
    }
    /// Write the configuration as pretty JSON.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Write the configuration, choosing the format by extension (.json/.yaml/.yml/.toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Read a configuration, choosing the format by extension (.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

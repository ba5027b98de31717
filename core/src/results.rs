//! Run records and error statistics.
//!
//! A [`RunOutput`] collects the estimate and the true state at each step of one filter run.
//! Independent runs (e.g. Monte Carlo repetitions) are kept as an ordered slice of outputs and
//! aggregated afterwards with [`aggregate_rmse`] or [`rmse_per_step`].
//!
//! Runs can be stored as CSV with one row per step:
//!
//! ```text
//! time,est_0,...,est_{n-1},true_0,...,true_{n-1}
//! ```
use std::error::Error;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use nalgebra::DVector;

/// Estimates and ground truth of a single filter run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOutput {
    /// Optional name or identifier for this run
    pub name: String,
    pub timestamps: Vec<DateTime<Utc>>,
    pub estimates: Vec<DVector<f64>>,
    pub truths: Vec<DVector<f64>>,
}
impl RunOutput {
    pub fn new(name: &str) -> Self {
        RunOutput {
            name: name.to_string(),
            ..Default::default()
        }
    }
    pub fn push(&mut self, timestamp: DateTime<Utc>, estimate: DVector<f64>, truth: DVector<f64>) {
        debug_assert_eq!(estimate.len(), truth.len());
        self.timestamps.push(timestamp);
        self.estimates.push(estimate);
        self.truths.push(truth);
    }
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
    /// Estimation error `estimate − truth` at each step.
    pub fn errors(&self) -> Vec<DVector<f64>> {
        self.estimates
            .iter()
            .zip(&self.truths)
            .map(|(est, truth)| est - truth)
            .collect()
    }
    /// Write the run as CSV.
    ///
    /// # Arguments
    /// * `path` - Path where the CSV file will be saved
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let n = self.estimates.first().map_or(0, |e| e.len());
        let mut header = vec!["time".to_string()];
        header.extend((0..n).map(|i| format!("est_{i}")));
        header.extend((0..n).map(|i| format!("true_{i}")));
        writer.write_record(&header)?;
        for ((t, est), truth) in self.timestamps.iter().zip(&self.estimates).zip(&self.truths) {
            let mut row = vec![t.to_rfc3339()];
            row.extend(est.iter().map(|v| v.to_string()));
            row.extend(truth.iter().map(|v| v.to_string()));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Read a run written by [`RunOutput::to_csv`]. The run is named after the file stem.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let mut reader = csv::Reader::from_path(path)?;
        let columns = reader.headers()?.len();
        if columns == 0 || columns % 2 == 0 {
            return Err(format!("malformed run header with {columns} columns").into());
        }
        let n = (columns - 1) / 2;
        let mut run = RunOutput::new(name);
        for record in reader.records() {
            let record = record?;
            let timestamp = DateTime::parse_from_rfc3339(&record[0])?.with_timezone(&Utc);
            let values = record
                .iter()
                .skip(1)
                .map(|v| v.parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()?;
            run.push(
                timestamp,
                DVector::from_column_slice(&values[..n]),
                DVector::from_column_slice(&values[n..]),
            );
        }
        Ok(run)
    }
}

/// Per-component root mean square of a set of error vectors. `None` when `errors` is empty.
pub fn rmse(errors: &[DVector<f64>]) -> Option<DVector<f64>> {
    let first = errors.first()?;
    let mut sum = DVector::<f64>::zeros(first.len());
    for e in errors {
        sum += e.component_mul(e);
    }
    Some((sum / errors.len() as f64).map(f64::sqrt))
}

/// RMSE over every step of every run.
pub fn aggregate_rmse(runs: &[RunOutput]) -> Option<DVector<f64>> {
    let errors: Vec<DVector<f64>> = runs.iter().flat_map(|run| run.errors()).collect();
    rmse(&errors)
}

/// RMSE across runs at each step index. Runs shorter than the longest contribute only to
/// the steps they have.
pub fn rmse_per_step(runs: &[RunOutput]) -> Vec<DVector<f64>> {
    let errors: Vec<Vec<DVector<f64>>> = runs.iter().map(RunOutput::errors).collect();
    let steps = errors.iter().map(Vec::len).max().unwrap_or(0);
    (0..steps)
        .filter_map(|k| {
            let at_step: Vec<DVector<f64>> =
                errors.iter().filter_map(|e| e.get(k).cloned()).collect();
            rmse(&at_step)
        })
        .collect()
}

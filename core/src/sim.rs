//! CSV data interface and the sequential fusion runner.
//!
//! This module provides:
//! - [`SensorRecord`]: one row of a recorded (or synthesized) rover dataset
//! - [`EstimateRecord`] and [`FusionResult`]: the filter's output stream
//! - [`run_filter`]: the driver that walks a time-ordered record stream through the
//!   predict/update recursion exactly once, in arrival order
//! - CSV import/export for both record types
//!
//! The runner owns two policies the filter itself does not: substituting a small epsilon
//! when consecutive records share a timestamp (a zero `dt` would freeze the
//! velocity-coupled covariance growth), and halting the run the moment any state
//! component goes non-finite, reporting the offending record index and timestamp while
//! retaining everything produced before it.

use crate::kalman::{FilterError, RoverEkf};
use crate::measurements::{ObservationMode, RoverMeasurement};
use crate::messages::FusionConfig;
use crate::RoverState;

use std::fmt::{self, Display};
use std::io;
use std::path::Path;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

/// Struct representing a single row of a rover sensor log.
///
/// Fields correspond one-to-one to the CSV columns. Channels follow the zero-as-absence
/// sentinel convention: a column holds `0.0` on rows where that sensor did not report.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SensorRecord {
    /// Sample timestamp in seconds, monotonically non-decreasing
    pub time: f64,
    /// Absolute position fix, x coordinate in meters
    pub x: f64,
    /// Absolute position fix, y coordinate in meters
    pub y: f64,
    /// IMU heading in radians
    pub yaw: f64,
    /// Odometry velocity along the world x axis in m/s
    pub v_x: f64,
    /// Odometry velocity along the world y axis in m/s
    pub v_y: f64,
    /// Odometry angular rate in rad/s
    pub w: f64,
    /// IMU acceleration along the world x axis in m/s^2
    pub a_x: f64,
    /// IMU acceleration along the world y axis in m/s^2
    pub a_y: f64,
}

impl SensorRecord {
    /// Reads a CSV file and returns its rows in file order.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes records to a CSV file with the standard header.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Decode this row into a measurement, deriving channel presence from the sentinel.
    pub fn measurement(&self) -> RoverMeasurement {
        RoverMeasurement::from_sentinel(
            self.time,
            [
                self.x, self.y, self.yaw, self.v_x, self.v_y, self.w, self.a_x, self.a_y,
            ],
        )
    }
}

/// One row of the filter's output stream: the estimated state tagged with the input
/// sample's timestamp.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EstimateRecord {
    /// Timestamp of the input sample this estimate corresponds to (seconds)
    pub time: f64,
    /// Estimated position x (meters)
    pub pos_x: f64,
    /// Estimated position y (meters)
    pub pos_y: f64,
    /// Estimated heading (radians)
    pub yaw: f64,
    /// Estimated velocity x (m/s)
    pub v_x: f64,
    /// Estimated velocity y (m/s)
    pub v_y: f64,
    /// Estimated angular rate (rad/s)
    pub w: f64,
    /// Estimated acceleration x (m/s^2)
    pub a_x: f64,
    /// Estimated acceleration y (m/s^2)
    pub a_y: f64,
    /// Estimated angular acceleration (rad/s^2)
    pub alpha: f64,
}

impl EstimateRecord {
    /// Build an output row from a state estimate and its source timestamp.
    pub fn new(time: f64, state: &RoverState) -> EstimateRecord {
        EstimateRecord {
            time,
            pos_x: state.x,
            pos_y: state.y,
            yaw: state.heading,
            v_x: state.velocity_x,
            v_y: state.velocity_y,
            w: state.angular_rate,
            a_x: state.accel_x,
            a_y: state.accel_y,
            alpha: state.angular_accel,
        }
    }

    /// Reads a previously written estimate stream back from CSV.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Where and when a run diverged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DivergenceReport {
    /// Index of the input record whose step produced a non-finite state
    pub index: usize,
    /// Timestamp of that record (seconds)
    pub time: f64,
}

impl Display for DivergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "non-finite state at record {} (t = {:.6} s)",
            self.index, self.time
        )
    }
}

/// Result of running the fusion filter over a record stream.
///
/// `estimates` holds one row per successfully processed input sample, in order.
/// `modes` holds the observation mode each step selected (same indexing). A step whose
/// update was skipped on a singular innovation still produces an estimate (the
/// predicted state) and is counted in `skipped_updates`. A diverged run stops early
/// and reports where in `divergence`.
#[derive(Debug, Default)]
pub struct FusionResult {
    /// Estimated state per processed input sample
    pub estimates: Vec<EstimateRecord>,
    /// Observation mode selected per processed input sample
    pub modes: Vec<ObservationMode>,
    /// Number of steps whose measurement update was skipped as unsolvable
    pub skipped_updates: usize,
    /// Set when the run halted on a non-finite state
    pub divergence: Option<DivergenceReport>,
}

impl FusionResult {
    /// Creates an empty result.
    pub fn new() -> FusionResult {
        FusionResult::default()
    }

    /// Writes the estimate stream to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.estimates {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Histogram of selected observation modes, aligned with [`ObservationMode::ALL`].
    pub fn mode_counts(&self) -> [usize; 5] {
        let mut counts = [0usize; 5];
        for mode in &self.modes {
            counts[mode.index()] += 1;
        }
        counts
    }
}

/// Run the fusion filter over a time-ordered record stream.
///
/// Consumes each record exactly once, in arrival order: compute `dt` against the
/// previous timestamp (the first record is differenced against zero, matching the
/// recording convention), substitute `config.min_time_step` when `dt` is zero, predict,
/// then update with the mode selected from the record's presence pattern.
///
/// A singular innovation covariance is a per-step fault: the update is skipped with a
/// warning and the predicted state stands. A non-finite state component is fatal: the
/// run halts immediately, no further records are processed, and everything accumulated
/// so far is returned along with the offending index and timestamp.
pub fn run_filter(records: &[SensorRecord], config: &FusionConfig) -> FusionResult {
    let mut result = FusionResult::new();
    if records.is_empty() {
        return result;
    }
    info!("fusing {} records", records.len());

    let mut ekf = RoverEkf::from_config(config);
    let mut last_time = 0.0;
    for (index, record) in records.iter().enumerate() {
        let mut dt = record.time - last_time;
        last_time = record.time;
        if dt == 0.0 {
            dt = config.min_time_step;
        }

        ekf.predict(dt);
        let measurement = record.measurement();
        match ekf.update(&measurement) {
            Ok(mode) => result.modes.push(mode),
            Err(FilterError::SingularInnovation(mode)) => {
                warn!(
                    "record {} (t = {:.6} s): singular innovation in {} mode, keeping prediction",
                    index, record.time, mode
                );
                result.skipped_updates += 1;
                result.modes.push(mode);
            }
        }

        let state = ekf.state();
        if !state.is_finite() {
            let report = DivergenceReport {
                index,
                time: record.time,
            };
            error!("{report}; halting run");
            result.divergence = Some(report);
            break;
        }
        result.estimates.push(EstimateRecord::new(record.time, &state));
    }

    let counts = result.mode_counts();
    let histogram: Vec<String> = ObservationMode::ALL
        .iter()
        .zip(counts.iter())
        .filter(|(_, n)| **n > 0)
        .map(|(mode, n)| format!("{mode}: {n}"))
        .collect();
    info!(
        "processed {} of {} records ({}; {} skipped updates)",
        result.estimates.len(),
        records.len(),
        histogram.join(", "),
        result.skipped_updates
    );
    result
}

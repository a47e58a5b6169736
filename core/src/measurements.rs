//! Measurement-related code for the rover fusion filter.
//!
//! This module defines the per-sample measurement container, the per-channel presence
//! mask, and the observation-mode selector that decides which subset of the state is
//! observable on a given sample.
//!
//! Recorded rover datasets carry eight channels per sample (`x, y, yaw, v_x, v_y, w,
//! a_x, a_y`) with a zero-as-absence sentinel: a channel that did not report holds an
//! exact `0.0`. The sentinel is decoded exactly once, at construction of a
//! [`RoverMeasurement`], into a [`ChannelMask`]; everything downstream (mode selection,
//! the filter update) consumes the mask and never re-inspects raw values for absence.
//! A true zero reading on a reporting channel is indistinguishable from absence under
//! this convention. That is a limitation of the recording format, which is why the mask
//! can also be supplied explicitly when the data source knows which sensors fired.

use crate::linearize::{
    combined_observation_matrix, inertial_observation_matrix, position_observation_matrix,
    velocity_observation_matrix,
};
use crate::{MEASUREMENT_DIM, STATE_DIM};

use std::fmt::{self, Display};

use nalgebra::{DMatrix, DVector};

/// Per-channel presence flags for one measurement sample.
///
/// `true` means the channel carries a real sensor reading this sample; `false` means the
/// sensor did not report and the stored value is the sentinel zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelMask {
    pub x: bool,
    pub y: bool,
    pub yaw: bool,
    pub v_x: bool,
    pub v_y: bool,
    pub w: bool,
    pub a_x: bool,
    pub a_y: bool,
}

impl ChannelMask {
    /// Decode the zero-as-absence sentinel: a channel is present iff its value is nonzero.
    pub fn from_sentinel(channels: &[f64; MEASUREMENT_DIM]) -> ChannelMask {
        ChannelMask {
            x: channels[0] != 0.0,
            y: channels[1] != 0.0,
            yaw: channels[2] != 0.0,
            v_x: channels[3] != 0.0,
            v_y: channels[4] != 0.0,
            w: channels[5] != 0.0,
            a_x: channels[6] != 0.0,
            a_y: channels[7] != 0.0,
        }
    }

    /// Mask with every channel present.
    pub fn all() -> ChannelMask {
        ChannelMask {
            x: true,
            y: true,
            yaw: true,
            v_x: true,
            v_y: true,
            w: true,
            a_x: true,
            a_y: true,
        }
    }

    /// Both coordinates of an absolute position fix are present.
    pub fn has_position_fix(&self) -> bool {
        self.x && self.y
    }

    /// At least one position coordinate is present.
    pub fn any_position(&self) -> bool {
        self.x || self.y
    }

    /// At least one odometry channel (v_x, v_y, w) is present.
    pub fn any_velocity(&self) -> bool {
        self.v_x || self.v_y || self.w
    }

    /// At least one inertial channel (yaw, a_x, a_y) is present.
    pub fn any_inertial(&self) -> bool {
        self.yaw || self.a_x || self.a_y
    }
}

/// A single time-tagged measurement sample.
///
/// Channel values are stored as recorded (sentinel zeros included); `mask` says which of
/// them are real readings. Instances are transient: one per input record, owned by the
/// current filter step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoverMeasurement {
    /// Sample timestamp in seconds
    pub time: f64,
    /// Absolute position fix, x coordinate in meters
    pub x: f64,
    /// Absolute position fix, y coordinate in meters
    pub y: f64,
    /// Heading in radians
    pub yaw: f64,
    /// Velocity along the world x axis in m/s
    pub v_x: f64,
    /// Velocity along the world y axis in m/s
    pub v_y: f64,
    /// Angular rate in rad/s
    pub w: f64,
    /// Acceleration along the world x axis in m/s^2
    pub a_x: f64,
    /// Acceleration along the world y axis in m/s^2
    pub a_y: f64,
    /// Which channels carry real readings this sample
    pub mask: ChannelMask,
}

impl Display for RoverMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RoverMeasurement(t: {:.3}, pos: [{}, {}], yaw: {}, vel: [{}, {}, {}], accel: [{}, {}])",
            self.time, self.x, self.y, self.yaw, self.v_x, self.v_y, self.w, self.a_x, self.a_y
        )
    }
}

impl RoverMeasurement {
    /// Build a measurement from raw channel values, decoding presence from the sentinel
    /// convention (zero = absent).
    pub fn from_sentinel(time: f64, channels: [f64; MEASUREMENT_DIM]) -> RoverMeasurement {
        let mask = ChannelMask::from_sentinel(&channels);
        RoverMeasurement::with_mask(time, channels, mask)
    }

    /// Build a measurement with an explicit presence mask, bypassing the sentinel
    /// convention. Use this when the data source knows which sensors fired and a genuine
    /// zero reading must survive.
    pub fn with_mask(
        time: f64,
        channels: [f64; MEASUREMENT_DIM],
        mask: ChannelMask,
    ) -> RoverMeasurement {
        RoverMeasurement {
            time,
            x: channels[0],
            y: channels[1],
            yaw: channels[2],
            v_x: channels[3],
            v_y: channels[4],
            w: channels[5],
            a_x: channels[6],
            a_y: channels[7],
            mask,
        }
    }

    /// The measurement in vector form, ordered `[x, y, yaw, v_x, v_y, w, a_x, a_y]`.
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.x, self.y, self.yaw, self.v_x, self.v_y, self.w, self.a_x, self.a_y,
        ])
    }
}

/// Map a predicted state to measurement space.
///
/// Every measured channel reads its state component directly, so this is the identity
/// projection onto the first eight state components.
pub fn expected_measurement(state: &DVector<f64>) -> DVector<f64> {
    assert_eq!(
        state.len(),
        STATE_DIM,
        "expected_measurement takes a full state vector"
    );
    DVector::from_fn(MEASUREMENT_DIM, |i, _| state[i])
}

/// Which subset of the state the current sample can observe.
///
/// Selected per sample from the presence mask, never persisted. Each variant maps to a
/// fixed 8x9 observation matrix in [`crate::linearize`]; `Combined` is the explicit
/// fallback for presence patterns outside the four recorded-data cases, so selection is
/// total and no sample ever reaches an undefined matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationMode {
    /// No sensor reported: the odometry row is recorded as genuinely at rest, so the
    /// velocity channels are treated as zero readings.
    OdometryAtRest,
    /// Only wheel odometry reported: velocity and turn-rate channels are observable.
    Odometry,
    /// Only the IMU reported: heading and acceleration channels are observable.
    Inertial,
    /// An absolute position fix is available: position channels are observable.
    PositionFix,
    /// Fallback for any other presence pattern (e.g. odometry and IMU together without a
    /// fix, or a one-sided fix): observe every measured channel at once.
    Combined,
}

impl Display for ObservationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl ObservationMode {
    /// Every mode, in selection-priority order. Handy for histograms and tests.
    pub const ALL: [ObservationMode; 5] = [
        ObservationMode::OdometryAtRest,
        ObservationMode::Odometry,
        ObservationMode::Inertial,
        ObservationMode::PositionFix,
        ObservationMode::Combined,
    ];

    /// Select the observation mode for a presence mask.
    ///
    /// The decision table, in order (first matching row wins):
    ///
    /// | position fix | odometry present | inertial present | mode |
    /// |---|---|---|---|
    /// | absent (both) | no | no | `OdometryAtRest` |
    /// | absent (both) | yes | no | `Odometry` |
    /// | absent (both) | no | yes | `Inertial` |
    /// | both coordinates | any | any | `PositionFix` |
    /// | anything else | | | `Combined` |
    ///
    /// "Anything else" covers odometry and inertial reporting together without a fix, and
    /// a fix where only one coordinate survived.
    pub fn select(mask: &ChannelMask) -> ObservationMode {
        match (
            mask.has_position_fix(),
            mask.any_position(),
            mask.any_velocity(),
            mask.any_inertial(),
        ) {
            (false, false, false, false) => ObservationMode::OdometryAtRest,
            (false, false, true, false) => ObservationMode::Odometry,
            (false, false, false, true) => ObservationMode::Inertial,
            (true, _, _, _) => ObservationMode::PositionFix,
            (false, _, _, _) => ObservationMode::Combined,
        }
    }

    /// The 8x9 observation matrix for this mode.
    pub fn observation_matrix(&self) -> DMatrix<f64> {
        match self {
            ObservationMode::OdometryAtRest | ObservationMode::Odometry => {
                velocity_observation_matrix()
            }
            ObservationMode::Inertial => inertial_observation_matrix(),
            ObservationMode::PositionFix => position_observation_matrix(),
            ObservationMode::Combined => combined_observation_matrix(),
        }
    }

    /// State indices this mode observes.
    pub fn observed_rows(&self) -> &'static [usize] {
        match self {
            ObservationMode::OdometryAtRest | ObservationMode::Odometry => &[3, 4, 5],
            ObservationMode::Inertial => &[2, 6, 7],
            ObservationMode::PositionFix => &[0, 1],
            ObservationMode::Combined => &[0, 1, 2, 3, 4, 5, 6, 7],
        }
    }

    /// Short human-readable name, used in logs and run summaries.
    pub fn label(&self) -> &'static str {
        match self {
            ObservationMode::OdometryAtRest => "odometry-at-rest",
            ObservationMode::Odometry => "odometry",
            ObservationMode::Inertial => "inertial",
            ObservationMode::PositionFix => "position-fix",
            ObservationMode::Combined => "combined",
        }
    }

    /// Stable index of this mode into [`ObservationMode::ALL`].
    pub fn index(&self) -> usize {
        match self {
            ObservationMode::OdometryAtRest => 0,
            ObservationMode::Odometry => 1,
            ObservationMode::Inertial => 2,
            ObservationMode::PositionFix => 3,
            ObservationMode::Combined => 4,
        }
    }
}

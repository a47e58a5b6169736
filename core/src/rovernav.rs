//! Planar rover navigation toolbox for intermittent multi-sensor fusion
//!
//! This crate provides the building blocks for a sequential state estimator that fuses
//! heterogeneous, intermittently-available sensor readings into a single consistent estimate
//! of a ground rover's planar pose, velocity, and acceleration. The expected sensor suite is:
//!
//! - an absolute positioning system (e.g. UWB beacon trilateration) reporting `x`/`y` fixes,
//! - wheel odometry reporting body velocities `v_x`/`v_y` and turn rate `w`,
//! - an IMU reporting heading `yaw` and linear accelerations `a_x`/`a_y`.
//!
//! Not every sensor reports on every sample. The hard part of the problem is not the Kalman
//! recursion itself but deciding, per sample, which subset of the state is actually observable
//! and switching the observation matrix accordingly without destabilizing the estimator. That
//! policy lives in [`measurements::ObservationMode`]; the recursion lives in
//! [`kalman::RoverEkf`]; the per-run driver lives in [`sim::run_filter`].
//!
//! Primarily built off of two crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): linear algebra for the filters.
//! - [`csv`](https://crates.io/crates/csv) + [`serde`](https://crates.io/crates/serde):
//!   the recorded-data interface.
//!
//! # State definition
//!
//! The nine-component planar state vector is:
//!
//! $$
//! x = [x, y, \theta, v_x, v_y, \omega, a_x, a_y, \alpha]
//! $$
//!
//! Where:
//! - $x$, $y$ are world-frame positions (meters),
//! - $\theta$ is the heading (radians, unwrapped),
//! - $v_x$, $v_y$ are world-frame velocities (m/s) and $\omega$ the angular rate (rad/s),
//! - $a_x$, $a_y$ are accelerations (m/s²) and $\alpha$ the angular acceleration (rad/s²).
//!
//! # Motion model
//!
//! Between samples the accelerations are held constant (zero-order hold) and everything
//! below them integrates once:
//!
//! $$
//! \begin{aligned}
//! p(+) &= p(-) + v(-) \\, \Delta t \\\\
//! v(+) &= v(-) + a(-) \\, \Delta t \\\\
//! a(+) &= a(-)
//! \end{aligned}
//! $$
//!
//! This map is linear in the state for a fixed $\Delta t$, so the state-transition Jacobian
//! in [`linearize::state_transition_jacobian`] is exact rather than a first-order
//! approximation.
//!
//! # Measurement convention
//!
//! Recorded datasets use a zero-as-absence sentinel: a channel that did not report this
//! sample holds an exact `0.0`. That convention is decoded once at the data boundary into an
//! explicit per-channel presence mask ([`measurements::ChannelMask`]); everything downstream
//! consumes the mask, never the raw sentinel.

pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod measurements;
pub mod messages;
pub mod sim;

use nalgebra::DVector;
use std::fmt::{self, Display};

/// Dimension of the rover state vector.
pub const STATE_DIM: usize = 9;
/// Dimension of the measurement vector (every state component except angular acceleration).
pub const MEASUREMENT_DIM: usize = 8;

/// Basic structure for holding the planar rover state: pose, velocity, and acceleration.
///
/// All components are world-frame scalars; see the crate-level docs for units. Heading is
/// stored unwrapped (an accumulated angle), matching the convention of the recorded yaw
/// channel it is fused against.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RoverState {
    /// Position along the world x axis in meters
    pub x: f64,
    /// Position along the world y axis in meters
    pub y: f64,
    /// Heading in radians
    pub heading: f64,
    /// Velocity along the world x axis in m/s
    pub velocity_x: f64,
    /// Velocity along the world y axis in m/s
    pub velocity_y: f64,
    /// Angular rate in rad/s
    pub angular_rate: f64,
    /// Acceleration along the world x axis in m/s^2
    pub accel_x: f64,
    /// Acceleration along the world y axis in m/s^2
    pub accel_y: f64,
    /// Angular acceleration in rad/s^2
    pub angular_accel: f64,
}

impl Display for RoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RoverState {{ pos: [{:.3}, {:.3}] m, heading: {:.4} rad, vel: [{:.3}, {:.3}] m/s, w: {:.4} rad/s, accel: [{:.3}, {:.3}] m/s^2, alpha: {:.4} rad/s^2 }}",
            self.x,
            self.y,
            self.heading,
            self.velocity_x,
            self.velocity_y,
            self.angular_rate,
            self.accel_x,
            self.accel_y,
            self.angular_accel
        )
    }
}

impl RoverState {
    /// Create a new RoverState with all components zero.
    pub fn new() -> RoverState {
        RoverState::default()
    }

    /// True when every component is a finite number.
    ///
    /// A non-finite component means the filter has diverged; the run driver treats this as
    /// fatal for the remainder of the run.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.heading.is_finite()
            && self.velocity_x.is_finite()
            && self.velocity_y.is_finite()
            && self.angular_rate.is_finite()
            && self.accel_x.is_finite()
            && self.accel_y.is_finite()
            && self.angular_accel.is_finite()
    }
}

impl From<RoverState> for Vec<f64> {
    fn from(state: RoverState) -> Self {
        vec![
            state.x,
            state.y,
            state.heading,
            state.velocity_x,
            state.velocity_y,
            state.angular_rate,
            state.accel_x,
            state.accel_y,
            state.angular_accel,
        ]
    }
}

impl From<RoverState> for DVector<f64> {
    fn from(state: RoverState) -> Self {
        DVector::from_vec(state.into())
    }
}

impl From<&DVector<f64>> for RoverState {
    /// Builds a RoverState from a nine-element state vector.
    ///
    /// Panics if the vector is not of length [`STATE_DIM`]; state vectors of any other
    /// length never belong to this filter family.
    fn from(vector: &DVector<f64>) -> Self {
        assert_eq!(
            vector.len(),
            STATE_DIM,
            "RoverState must be built from a vector of length {}",
            STATE_DIM
        );
        RoverState {
            x: vector[0],
            y: vector[1],
            heading: vector[2],
            velocity_x: vector[3],
            velocity_y: vector[4],
            angular_rate: vector[5],
            accel_x: vector[6],
            accel_y: vector[7],
            angular_accel: vector[8],
        }
    }
}

/// Propagate a rover state forward by `dt` seconds under the constant-acceleration model.
///
/// Position and heading advance by their velocities, velocities advance by their
/// accelerations, and the acceleration block is carried forward unchanged (zero-order
/// hold). Pure and total for any finite state and `dt >= 0`; the caller owns the policy of
/// substituting a small epsilon for a zero `dt` (see [`sim::run_filter`]).
pub fn forward(state: &mut RoverState, dt: f64) {
    state.x += state.velocity_x * dt;
    state.y += state.velocity_y * dt;
    state.heading += state.angular_rate * dt;
    state.velocity_x += state.accel_x * dt;
    state.velocity_y += state.accel_y * dt;
    state.angular_rate += state.angular_accel * dt;
}

//! Jacobian utilities for the planar rover EKF
//!
//! This module provides the analytic state-transition Jacobian for the constant-acceleration
//! motion model and the observation matrices for each sensor-presence mode. Because the
//! motion model is linear in the state for a fixed `dt`, the state-transition Jacobian is
//! exact, not a first-order approximation.
//!
//! # State Ordering
//!
//! The 9-state rover vector follows the ordering:
//! ```text
//! x = [x, y, theta, v_x, v_y, w, a_x, a_y, alpha]
//! ```
//!
//! # Measurement Ordering
//!
//! The 8-channel measurement vector follows the ordering:
//! ```text
//! z = [x, y, yaw, v_x, v_y, w, a_x, a_y]
//! ```
//! i.e. every state component except angular acceleration, which no sensor observes
//! directly. Each observation matrix is 8x9 with ones at the (channel, state) pairs the
//! mode observes and all-zero rows elsewhere; a zero row means "no information this step",
//! not "this channel reads zero".

use crate::{MEASUREMENT_DIM, STATE_DIM};
use nalgebra::DMatrix;

/// Exact state-transition Jacobian F(dt) of the constant-acceleration model.
///
/// Identity plus `dt` at the position←velocity couplings (x←v_x, y←v_y, theta←w) and the
/// velocity←acceleration couplings (v_x←a_x, v_y←a_y, w←alpha).
pub fn state_transition_jacobian(dt: f64) -> DMatrix<f64> {
    let mut f = DMatrix::<f64>::identity(STATE_DIM, STATE_DIM);
    f[(0, 3)] = dt; // ∂x/∂v_x
    f[(1, 4)] = dt; // ∂y/∂v_y
    f[(2, 5)] = dt; // ∂theta/∂w
    f[(3, 6)] = dt; // ∂v_x/∂a_x
    f[(4, 7)] = dt; // ∂v_y/∂a_y
    f[(5, 8)] = dt; // ∂w/∂alpha
    f
}

/// Observation matrix for odometry-derived motion: velocity and turn-rate rows only.
pub fn velocity_observation_matrix() -> DMatrix<f64> {
    let mut h = DMatrix::<f64>::zeros(MEASUREMENT_DIM, STATE_DIM);
    h[(3, 3)] = 1.0; // ∂(z_vx)/∂(v_x)
    h[(4, 4)] = 1.0; // ∂(z_vy)/∂(v_y)
    h[(5, 5)] = 1.0; // ∂(z_w)/∂(w)
    h
}

/// Observation matrix for inertial channels: heading and acceleration rows only.
pub fn inertial_observation_matrix() -> DMatrix<f64> {
    let mut h = DMatrix::<f64>::zeros(MEASUREMENT_DIM, STATE_DIM);
    h[(2, 2)] = 1.0; // ∂(z_yaw)/∂(theta)
    h[(6, 6)] = 1.0; // ∂(z_ax)/∂(a_x)
    h[(7, 7)] = 1.0; // ∂(z_ay)/∂(a_y)
    h
}

/// Observation matrix for an absolute position fix: position rows only.
pub fn position_observation_matrix() -> DMatrix<f64> {
    let mut h = DMatrix::<f64>::zeros(MEASUREMENT_DIM, STATE_DIM);
    h[(0, 0)] = 1.0; // ∂(z_x)/∂(x)
    h[(1, 1)] = 1.0; // ∂(z_y)/∂(y)
    h
}

/// Observation matrix for the fallback mode: every measured channel at once.
///
/// Union of the position, velocity, and inertial rows, used when the presence pattern
/// matches none of the single-group modes.
pub fn combined_observation_matrix() -> DMatrix<f64> {
    let mut h = DMatrix::<f64>::zeros(MEASUREMENT_DIM, STATE_DIM);
    for i in 0..MEASUREMENT_DIM {
        h[(i, i)] = 1.0;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transition_jacobian_structure() {
        let dt = 0.25;
        let f = state_transition_jacobian(dt);
        assert_eq!(f.shape(), (STATE_DIM, STATE_DIM));
        for i in 0..STATE_DIM {
            for j in 0..STATE_DIM {
                let expected = if i == j {
                    1.0
                } else if j == i + 3 && i < 6 {
                    dt
                } else {
                    0.0
                };
                assert_eq!(f[(i, j)], expected, "F[({i}, {j})]");
            }
        }
    }

    #[test]
    fn state_transition_jacobian_zero_dt_is_identity() {
        let f = state_transition_jacobian(0.0);
        assert_eq!(f, DMatrix::<f64>::identity(STATE_DIM, STATE_DIM));
    }

    fn assert_rows(h: &DMatrix<f64>, observed: &[usize]) {
        assert_eq!(h.shape(), (MEASUREMENT_DIM, STATE_DIM));
        for row in 0..MEASUREMENT_DIM {
            for col in 0..STATE_DIM {
                let expected = if observed.contains(&row) && col == row {
                    1.0
                } else {
                    0.0
                };
                assert_eq!(h[(row, col)], expected, "H[({row}, {col})]");
            }
        }
    }

    #[test]
    fn velocity_rows() {
        assert_rows(&velocity_observation_matrix(), &[3, 4, 5]);
    }

    #[test]
    fn inertial_rows() {
        assert_rows(&inertial_observation_matrix(), &[2, 6, 7]);
    }

    #[test]
    fn position_rows() {
        assert_rows(&position_observation_matrix(), &[0, 1]);
    }

    #[test]
    fn combined_rows() {
        assert_rows(&combined_observation_matrix(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }
}

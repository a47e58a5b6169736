//! Extended Kalman filter for the planar rover fusion problem.
//!
//! The filter owns the running nine-state estimate and its covariance and exposes the
//! two halves of the recursion: [`RoverEkf::predict`] propagates through the
//! constant-acceleration motion model, [`RoverEkf::update`] corrects with whichever
//! sensor channels reported this sample, switching the observation matrix through
//! [`ObservationMode`].
//!
//! # Predict
//!
//! $$
//! \begin{aligned}
//! \bar{x} &= f(x, \Delta t) \\\\
//! \bar{P} &= F \\, P \\, F^T + Q
//! \end{aligned}
//! $$
//!
//! where $f$ is the constant-acceleration model ([`crate::forward`]) and $F$ its exact
//! Jacobian ([`crate::linearize::state_transition_jacobian`]).
//!
//! # Update
//!
//! $$
//! \begin{aligned}
//! S &= H \\, \bar{P} \\, H^T + R \\\\
//! K &= \bar{P} \\, H^T S^{-1} \\\\
//! x &= \bar{x} + K (z - h(\bar{x})) \\\\
//! P &= (I - K H) \\, \bar{P}
//! \end{aligned}
//! $$
//!
//! The gain solve goes through [`crate::linalg::robust_spd_solve`] rather than a direct
//! inverse: modes with all-zero observation rows leave `S` leaning entirely on `R` along
//! those rows, and an unsolvable `S` is surfaced as the recoverable
//! [`FilterError::SingularInnovation`] so the caller can keep the predicted state and
//! move on. The complementary tuning invariant is that `R` must be large on channels a
//! mode does not observe, so their zero rows contribute negligible correction.
//!
//! After both halves the covariance is symmetrized and given a small diagonal nudge to
//! hold the positive semi-definite invariant against round-off.

use crate::linalg::{robust_spd_solve, symmetrize};
use crate::linearize::state_transition_jacobian;
use crate::measurements::{ObservationMode, RoverMeasurement, expected_measurement};
use crate::messages::FusionConfig;
use crate::{MEASUREMENT_DIM, RoverState, STATE_DIM, forward};

use std::error::Error;
use std::fmt::{self, Debug, Display};

use nalgebra::{DMatrix, DVector};

/// Diagonal regularization applied after every predict and update.
const COVARIANCE_JITTER: f64 = 1e-9;

/// Per-step recoverable filter faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterError {
    /// The innovation covariance could not be solved even with jitter and an explicit
    /// inverse. The update was skipped; the predicted state stands.
    SingularInnovation(ObservationMode),
}

impl Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::SingularInnovation(mode) => write!(
                f,
                "singular innovation covariance in {mode} mode; update skipped"
            ),
        }
    }
}

impl Error for FilterError {}

/// Extended Kalman filter over the planar rover state.
///
/// Construct once per run, then drive strictly sequentially: each sample's
/// predict/update pair depends on the mutated state and covariance left by the previous
/// sample. Noise matrices are fixed at construction.
#[derive(Clone)]
pub struct RoverEkf {
    /// State estimate vector (9 elements)
    mean_state: DVector<f64>,
    /// State covariance matrix (9x9)
    covariance: DMatrix<f64>,
    /// Process noise covariance matrix (9x9)
    process_noise: DMatrix<f64>,
    /// Measurement noise covariance matrix (8x8)
    measurement_noise: DMatrix<f64>,
}

impl Debug for RoverEkf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoverEkf")
            .field("mean_state", &self.mean_state)
            .field("covariance", &self.covariance)
            .field("process_noise", &self.process_noise)
            .field("measurement_noise", &self.measurement_noise)
            .finish()
    }
}

impl Display for RoverEkf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoverEkf {{ state: {} }}", self.state())
    }
}

impl RoverEkf {
    /// Create a new filter from an initial state and diagonal noise specifications.
    ///
    /// # Arguments
    /// * `initial_state` - State estimate at the start of the run.
    /// * `covariance_diagonal` - Initial state uncertainty, 9 entries.
    /// * `process_noise_diagonal` - Process noise Q diagonal, 9 entries.
    /// * `measurement_noise_diagonal` - Measurement noise R diagonal, 8 entries.
    ///
    /// Panics if a diagonal has the wrong length; the state and measurement layouts are
    /// fixed for this filter family.
    pub fn new(
        initial_state: RoverState,
        covariance_diagonal: &[f64],
        process_noise_diagonal: &[f64],
        measurement_noise_diagonal: &[f64],
    ) -> RoverEkf {
        assert_eq!(
            covariance_diagonal.len(),
            STATE_DIM,
            "initial covariance diagonal must have {} entries",
            STATE_DIM
        );
        assert_eq!(
            process_noise_diagonal.len(),
            STATE_DIM,
            "process noise diagonal must have {} entries",
            STATE_DIM
        );
        assert_eq!(
            measurement_noise_diagonal.len(),
            MEASUREMENT_DIM,
            "measurement noise diagonal must have {} entries",
            MEASUREMENT_DIM
        );
        RoverEkf {
            mean_state: initial_state.into(),
            covariance: DMatrix::from_diagonal(&DVector::from_row_slice(covariance_diagonal)),
            process_noise: DMatrix::from_diagonal(&DVector::from_row_slice(
                process_noise_diagonal,
            )),
            measurement_noise: DMatrix::from_diagonal(&DVector::from_row_slice(
                measurement_noise_diagonal,
            )),
        }
    }

    /// Create a filter from a run configuration, starting at the all-zero state.
    pub fn from_config(config: &FusionConfig) -> RoverEkf {
        RoverEkf::new(
            RoverState::new(),
            &config.initial_covariance_diagonal,
            &config.process_noise_diagonal,
            &config.measurement_noise_diagonal,
        )
    }

    /// Predict step: propagate state and covariance forward by `dt` seconds.
    ///
    /// `dt` must be strictly positive; the run driver substitutes a small epsilon for
    /// repeated timestamps before calling in here (a zero `dt` would leave the
    /// velocity-coupled covariance terms frozen and mask stale estimates).
    pub fn predict(&mut self, dt: f64) {
        let f_matrix = state_transition_jacobian(dt);

        let mut state = RoverState::from(&self.mean_state);
        forward(&mut state, dt);
        self.mean_state = state.into();

        // P_bar = F * P * F^T + Q
        self.covariance = &f_matrix * &self.covariance * f_matrix.transpose() + &self.process_noise;
        self.covariance = symmetrize(&self.covariance);
        for i in 0..STATE_DIM {
            self.covariance[(i, i)] += COVARIANCE_JITTER;
        }
    }

    /// Update step: correct the prediction with one measurement sample.
    ///
    /// The observation matrix is selected from the sample's presence mask; returns the
    /// mode that was applied. On a singular innovation covariance the update is skipped
    /// and the predicted state is left in place; the error is per-step, not fatal.
    pub fn update(&mut self, measurement: &RoverMeasurement) -> Result<ObservationMode, FilterError> {
        let mode = ObservationMode::select(&measurement.mask);
        let h = mode.observation_matrix();

        let z_hat = expected_measurement(&self.mean_state);
        let innovation = measurement.to_vector() - z_hat;

        // S = H * P * H^T + R
        let s = &h * &self.covariance * h.transpose() + &self.measurement_noise;

        // K = P * H^T * S^-1, via K^T = S^-1 * (H * P) since S and P are symmetric
        let hp = &h * &self.covariance;
        let Some(gain_t) = robust_spd_solve(&symmetrize(&s), &hp) else {
            return Err(FilterError::SingularInnovation(mode));
        };
        let gain = gain_t.transpose();

        self.mean_state += &gain * innovation;

        // P = (I - K * H) * P
        let i_kh = DMatrix::<f64>::identity(STATE_DIM, STATE_DIM) - &gain * &h;
        self.covariance = &i_kh * &self.covariance;
        self.covariance = symmetrize(&self.covariance);
        for i in 0..STATE_DIM {
            self.covariance[(i, i)] += COVARIANCE_JITTER;
        }
        Ok(mode)
    }

    /// The current state estimate.
    pub fn state(&self) -> RoverState {
        RoverState::from(&self.mean_state)
    }

    /// The current state estimate in vector form.
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean_state
    }

    /// The current state uncertainty.
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::FusionConfig;
    use assert_approx_eq::assert_approx_eq;

    fn default_filter() -> RoverEkf {
        RoverEkf::from_config(&FusionConfig::default())
    }

    #[test]
    fn construction_shapes() {
        let ekf = default_filter();
        assert_eq!(ekf.mean().len(), STATE_DIM);
        assert_eq!(ekf.covariance().shape(), (STATE_DIM, STATE_DIM));
        assert_eq!(ekf.state(), RoverState::new());
    }

    #[test]
    fn predict_moves_state_with_velocity() {
        let initial = RoverState {
            velocity_x: 1.0,
            ..RoverState::new()
        };
        let config = FusionConfig::default();
        let mut ekf = RoverEkf::new(
            initial,
            &config.initial_covariance_diagonal,
            &config.process_noise_diagonal,
            &config.measurement_noise_diagonal,
        );
        ekf.predict(2.0);
        assert_approx_eq!(ekf.state().x, 2.0);
        assert_approx_eq!(ekf.state().velocity_x, 1.0);
    }

    #[test]
    fn predict_grows_position_uncertainty() {
        let mut ekf = default_filter();
        let before = ekf.covariance()[(0, 0)];
        ekf.predict(1.0);
        let after = ekf.covariance()[(0, 0)];
        // Process noise plus the velocity coupling both inflate position variance
        assert!(after > before);
    }

    #[test]
    fn predict_keeps_covariance_symmetric() {
        let mut ekf = default_filter();
        ekf.predict(0.1);
        ekf.predict(0.7);
        let p = ekf.covariance();
        for i in 0..STATE_DIM {
            for j in 0..STATE_DIM {
                assert_approx_eq!(p[(i, j)], p[(j, i)], 1e-12);
            }
        }
    }

    #[test]
    fn zero_innovation_update_is_a_no_op_on_the_state() {
        let mut ekf = default_filter();
        ekf.predict(1.0);
        let state_before = ekf.state();
        let w_variance_before = ekf.covariance()[(5, 5)];

        // All channels sentinel-zero matches the predicted all-zero state exactly
        let z = RoverMeasurement::from_sentinel(1.0, [0.0; MEASUREMENT_DIM]);
        let mode = ekf.update(&z).expect("update should apply");
        assert_eq!(mode, ObservationMode::OdometryAtRest);

        let state_after = ekf.state();
        assert_approx_eq!(state_after.x, state_before.x, 1e-12);
        assert_approx_eq!(state_after.velocity_x, state_before.velocity_x, 1e-12);
        assert_approx_eq!(state_after.angular_rate, state_before.angular_rate, 1e-12);
        // The observed turn-rate row tightens
        assert!(ekf.covariance()[(5, 5)] < w_variance_before);
    }

    #[test]
    fn position_fix_pulls_the_estimate_toward_the_fix() {
        let mut ekf = default_filter();
        ekf.predict(1.0);
        let z = RoverMeasurement::from_sentinel(1.0, [2.0, -2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let mode = ekf.update(&z).expect("update should apply");
        assert_eq!(mode, ObservationMode::PositionFix);
        let state = ekf.state();
        assert!(state.x > 0.0 && state.x < 2.0);
        assert!(state.y < 0.0 && state.y > -2.0);
    }

    #[test]
    fn non_finite_covariance_surfaces_as_singular_innovation() {
        let mut ekf = default_filter();
        // A poisoned time step contaminates the covariance; the update must report the
        // solve failure instead of propagating garbage through the gain.
        ekf.predict(f64::NAN);
        let z = RoverMeasurement::from_sentinel(1.0, [2.0, -2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(
            ekf.update(&z),
            Err(FilterError::SingularInnovation(ObservationMode::PositionFix))
        );
    }
}

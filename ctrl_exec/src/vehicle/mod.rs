//! # Vehicle module
//!
//! Kinematic bicycle model of the vehicle. Two views of the same dynamics
//! are provided:
//!
//! - the nonlinear transition ([`VehicleModel::step`]), used to simulate the
//!   vehicle and to predict the nominal trajectory the optimiser linearises
//!   about, and
//! - a first-order affine approximation ([`VehicleModel::linearize`]) at an
//!   operating point, which keeps the per-cycle optimisation convex.
//!
//! The state is an immutable value; the transition returns a new state
//! rather than mutating in place, so the control loop simply replaces its
//! current value each cycle.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Matrix4, Matrix4x2, Vector4};
use serde::Serialize;

// Internal
pub use self::params::Params;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of states in the model: x, y, v, yaw
pub const NUM_STATES: usize = 4;

/// Number of inputs to the model: acceleration, steering angle
pub const NUM_INPUTS: usize = 2;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The state of the vehicle at one instant.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct VehicleState {
    /// Position x
    pub x_m: f64,

    /// Position y
    pub y_m: f64,

    /// Heading
    pub yaw_rad: f64,

    /// Signed speed (negative when reversing)
    pub speed_ms: f64,
}

/// A control command for one cycle.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CtrlCmd {
    /// Acceleration demand
    pub accel_ms2: f64,

    /// Steering angle demand
    pub steer_rad: f64,
}

/// The affine approximation `x[t+1] = A x[t] + B u[t] + C` of the bicycle
/// dynamics at an operating point.
///
/// The offset `C` carries the linearisation residual, so evaluating the
/// model exactly at the operating point reproduces the nonlinear
/// prediction.
#[derive(Debug, Clone)]
pub struct LinearModel {
    /// State matrix
    pub a: Matrix4<f64>,

    /// Input matrix
    pub b: Matrix4x2<f64>,

    /// Affine offset
    pub c: Vector4<f64>,
}

/// The kinematic bicycle model.
#[derive(Debug, Clone)]
pub struct VehicleModel {
    params: Params,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VehicleState {
    /// Get the state as a vector in the model's ordering [x, y, v, yaw].
    pub fn as_vector(&self) -> Vector4<f64> {
        Vector4::new(self.x_m, self.y_m, self.speed_ms, self.yaw_rad)
    }
}

impl VehicleModel {
    /// Create a new model with the given parameters.
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Access the model parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Propagate the state over one time step with the given command.
    ///
    /// The steering demand is clamped to its limit before use and the
    /// resulting speed is clamped after integration, matching what the real
    /// actuators would do.
    pub fn step(&self, state: &VehicleState, cmd: &CtrlCmd, dt_s: f64) -> VehicleState {
        let p = &self.params;

        let steer_rad = cmd.steer_rad.clamp(-p.max_steer_rad, p.max_steer_rad);

        let x_m = state.x_m + state.speed_ms * state.yaw_rad.cos() * dt_s;
        let y_m = state.y_m + state.speed_ms * state.yaw_rad.sin() * dt_s;
        let yaw_rad =
            state.yaw_rad + state.speed_ms / p.wheelbase_m * steer_rad.tan() * dt_s;
        let speed_ms = (state.speed_ms + cmd.accel_ms2 * dt_s)
            .clamp(p.min_speed_ms, p.max_speed_ms);

        VehicleState {
            x_m,
            y_m,
            yaw_rad,
            speed_ms,
        }
    }

    /// Linearise the dynamics at the operating point (speed, yaw, steer).
    ///
    /// The partial derivatives encode the position-rate sensitivity to yaw
    /// and speed, and the yaw-rate sensitivity to speed through
    /// tan(steer)/wheelbase.
    pub fn linearize(&self, speed_ms: f64, yaw_rad: f64, steer_rad: f64, dt_s: f64) -> LinearModel {
        let wb = self.params.wheelbase_m;
        let (sin_yaw, cos_yaw) = yaw_rad.sin_cos();
        let cos_steer_sq = steer_rad.cos().powi(2);

        let mut a = Matrix4::identity();
        a[(0, 2)] = dt_s * cos_yaw;
        a[(0, 3)] = -dt_s * speed_ms * sin_yaw;
        a[(1, 2)] = dt_s * sin_yaw;
        a[(1, 3)] = dt_s * speed_ms * cos_yaw;
        a[(3, 2)] = dt_s * steer_rad.tan() / wb;

        let mut b = Matrix4x2::zeros();
        b[(2, 0)] = dt_s;
        b[(3, 1)] = dt_s * speed_ms / (wb * cos_steer_sq);

        let mut c = Vector4::zeros();
        c[0] = dt_s * speed_ms * sin_yaw * yaw_rad;
        c[1] = -dt_s * speed_ms * cos_yaw * yaw_rad;
        c[3] = -dt_s * speed_ms * steer_rad / (wb * cos_steer_sq);

        LinearModel { a, b, c }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn test_params() -> Params {
        Params {
            wheelbase_m: 2.5,
            max_steer_rad: 45f64.to_radians(),
            max_steer_rate_rads: 30f64.to_radians(),
            max_speed_ms: 55.0 / 3.6,
            min_speed_ms: 0.0,
            max_accel_ms2: 1.0,
        }
    }

    #[test]
    fn step_straight_line() {
        let model = VehicleModel::new(test_params());
        let state = VehicleState {
            x_m: 0.0,
            y_m: 0.0,
            yaw_rad: 0.0,
            speed_ms: 5.0,
        };

        let next = model.step(&state, &CtrlCmd::default(), 0.2);

        assert_relative_eq!(next.x_m, 1.0, epsilon = 1e-12);
        assert_relative_eq!(next.y_m, 0.0, epsilon = 1e-12);
        assert_relative_eq!(next.yaw_rad, 0.0, epsilon = 1e-12);
        assert_relative_eq!(next.speed_ms, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn step_clamps_steer_and_speed() {
        let params = test_params();
        let model = VehicleModel::new(params.clone());

        // Over-limit steer behaves like max steer
        let state = VehicleState {
            speed_ms: 5.0,
            ..Default::default()
        };
        let over = model.step(
            &state,
            &CtrlCmd {
                accel_ms2: 0.0,
                steer_rad: 10.0,
            },
            0.2,
        );
        let at_limit = model.step(
            &state,
            &CtrlCmd {
                accel_ms2: 0.0,
                steer_rad: params.max_steer_rad,
            },
            0.2,
        );
        assert_relative_eq!(over.yaw_rad, at_limit.yaw_rad, epsilon = 1e-12);

        // Speed saturates at the maximum
        let fast = VehicleState {
            speed_ms: params.max_speed_ms,
            ..Default::default()
        };
        let next = model.step(
            &fast,
            &CtrlCmd {
                accel_ms2: 2.0,
                steer_rad: 0.0,
            },
            0.2,
        );
        assert_relative_eq!(next.speed_ms, params.max_speed_ms, epsilon = 1e-12);
    }

    #[test]
    fn linear_model_exact_at_operating_point() {
        let model = VehicleModel::new(test_params());
        let dt_s = 0.2;

        let state = VehicleState {
            x_m: 3.0,
            y_m: -1.5,
            yaw_rad: 0.4,
            speed_ms: 4.0,
        };
        let cmd = CtrlCmd {
            accel_ms2: 0.5,
            steer_rad: 0.1,
        };

        // Linearise exactly at the state/command operating point
        let lin = model.linearize(state.speed_ms, state.yaw_rad, cmd.steer_rad, dt_s);

        let u = nalgebra::Vector2::new(cmd.accel_ms2, cmd.steer_rad);
        let predicted = lin.a * state.as_vector() + lin.b * u + lin.c;

        let next = model.step(&state, &cmd, dt_s);

        assert_relative_eq!(predicted[0], next.x_m, epsilon = 1e-12);
        assert_relative_eq!(predicted[1], next.y_m, epsilon = 1e-12);
        assert_relative_eq!(predicted[2], next.speed_ms, epsilon = 1e-12);
        assert_relative_eq!(predicted[3], next.yaw_rad, epsilon = 1e-12);
    }
}

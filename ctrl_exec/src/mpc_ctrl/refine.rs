//! # Iterative refinement
//!
//! The QP in [`super::solver`] is only valid near the trajectory it was
//! linearised about, so each cycle alternates between predicting a nominal
//! trajectory under the current control sequence and re-solving about it.
//! The loop stops once the controls stop changing or the iteration cap is
//! hit, whichever comes first.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::warn;

// Internal
use crate::vehicle::{CtrlCmd, VehicleModel, VehicleState};

use super::solver::{solve_linear_mpc, MpcSolution, SolveError};
use super::tracker::RefWindow;
use super::Params;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A control sequence over one horizon, used to seed the refinement and to
/// warm start the next cycle.
#[derive(Debug, Clone)]
pub struct ControlSequence {
    /// Acceleration demands, one per horizon step
    pub accel_ms2: Vec<f64>,

    /// Steering demands, one per horizon step
    pub steer_rad: Vec<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How the refinement loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineOutcome {
    /// The control change dropped below the threshold
    Converged {
        /// Number of solves taken
        iters: usize,
    },

    /// The iteration cap was hit; the final iterate is still usable
    IterLimit,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ControlSequence {
    /// An all-zero sequence for the given horizon, used as the cold-start
    /// seed.
    pub fn zeros(horizon: usize) -> Self {
        Self {
            accel_ms2: vec![0.0; horizon],
            steer_rad: vec![0.0; horizon],
        }
    }

    /// The command for the first horizon step.
    pub fn first(&self) -> CtrlCmd {
        CtrlCmd {
            accel_ms2: self.accel_ms2[0],
            steer_rad: self.steer_rad[0],
        }
    }
}

impl From<&MpcSolution> for ControlSequence {
    fn from(solution: &MpcSolution) -> Self {
        Self {
            accel_ms2: solution.accel_ms2.clone(),
            steer_rad: solution.steer_rad.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Simulate the nonlinear model forward under a control sequence.
///
/// Returns `horizon + 1` states starting at `x0`. This is the nominal
/// trajectory each QP solve is linearised about.
pub fn predict_motion(
    x0: &VehicleState,
    sequence: &ControlSequence,
    model: &VehicleModel,
    dt_s: f64,
) -> Vec<VehicleState> {
    let mut states = Vec::with_capacity(sequence.accel_ms2.len() + 1);
    states.push(*x0);

    for t in 0..sequence.accel_ms2.len() {
        let cmd = CtrlCmd {
            accel_ms2: sequence.accel_ms2[t],
            steer_rad: sequence.steer_rad[t],
        };

        let prev = states[t];
        states.push(model.step(&prev, &cmd, dt_s));
    }

    states
}

/// Run the predict-solve refinement loop for one cycle.
///
/// Seeds from `warm_start` when given, otherwise from zeros. A solve error
/// aborts the cycle; hitting the iteration cap does not, the last iterate
/// is returned with [`RefineOutcome::IterLimit`].
pub fn refine_controls(
    x0: &VehicleState,
    window: &RefWindow,
    warm_start: Option<ControlSequence>,
    model: &VehicleModel,
    params: &Params,
) -> Result<(MpcSolution, RefineOutcome), SolveError> {
    let mut sequence = warm_start.unwrap_or_else(|| ControlSequence::zeros(params.horizon));
    let mut solution = None;

    for iter in 0..params.max_refine_iters {
        let nominal = predict_motion(x0, &sequence, model, params.dt_s);
        let new_solution = solve_linear_mpc(x0, window, &nominal, model, params)?;

        let du: f64 = new_solution
            .accel_ms2
            .iter()
            .zip(&sequence.accel_ms2)
            .chain(new_solution.steer_rad.iter().zip(&sequence.steer_rad))
            .map(|(new, old)| (new - old).abs())
            .sum();

        sequence = ControlSequence::from(&new_solution);
        solution = Some(new_solution);

        if du <= params.du_threshold {
            return Ok((solution.unwrap(), RefineOutcome::Converged { iters: iter + 1 }));
        }
    }

    warn!(
        "MPC refinement hit the iteration cap ({}), using the last iterate",
        params.max_refine_iters
    );

    // max_refine_iters >= 1, so at least one solve succeeded
    Ok((solution.unwrap(), RefineOutcome::IterLimit))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::test_utils::{test_mpc_params, test_vehicle_params};
    use approx::assert_relative_eq;

    #[test]
    fn prediction_starts_at_initial_state() {
        let params = test_mpc_params();
        let model = VehicleModel::new(test_vehicle_params());

        let x0 = VehicleState {
            x_m: 1.0,
            y_m: 2.0,
            yaw_rad: 0.5,
            speed_ms: 3.0,
        };
        let sequence = ControlSequence::zeros(params.horizon);

        let states = predict_motion(&x0, &sequence, &model, params.dt_s);

        assert_eq!(states.len(), params.horizon + 1);
        assert_relative_eq!(states[0].x_m, x0.x_m);
        assert_relative_eq!(states[0].speed_ms, x0.speed_ms);

        // Coasting at constant speed along the heading
        for t in 1..states.len() {
            assert_relative_eq!(states[t].speed_ms, 3.0, epsilon = 1e-12);
            assert!(states[t].x_m > states[t - 1].x_m);
        }
    }

    #[test]
    fn on_reference_converges_with_near_zero_controls() {
        let params = test_mpc_params();
        let model = VehicleModel::new(test_vehicle_params());

        let x0 = VehicleState::default();
        let window = RefWindow {
            x_m: vec![0.0; params.horizon + 1],
            y_m: vec![0.0; params.horizon + 1],
            speed_ms: vec![0.0; params.horizon + 1],
            yaw_rad: vec![0.0; params.horizon + 1],
            steer_rad: vec![0.0; params.horizon + 1],
        };

        let (solution, outcome) =
            refine_controls(&x0, &window, None, &model, &params).unwrap();

        assert!(matches!(outcome, RefineOutcome::Converged { .. }));
        for t in 0..params.horizon {
            assert_relative_eq!(solution.accel_ms2[t], 0.0, epsilon = 1e-4);
            assert_relative_eq!(solution.steer_rad[t], 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn solve_failure_aborts_refinement() {
        let params = test_mpc_params();
        let vp = test_vehicle_params();
        let model = VehicleModel::new(vp.clone());

        // Initial speed violates the state bounds, so every solve is
        // infeasible
        let x0 = VehicleState {
            speed_ms: vp.max_speed_ms + 10.0,
            ..Default::default()
        };
        let window = RefWindow {
            x_m: vec![0.0; params.horizon + 1],
            y_m: vec![0.0; params.horizon + 1],
            speed_ms: vec![0.0; params.horizon + 1],
            yaw_rad: vec![0.0; params.horizon + 1],
            steer_rad: vec![0.0; params.horizon + 1],
        };

        let result = refine_controls(&x0, &window, None, &model, &params);
        assert!(matches!(result, Err(SolveError::Infeasible)));
    }
}

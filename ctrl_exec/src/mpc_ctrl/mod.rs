//! # MPC control module
//!
//! Keeps the vehicle on a course by solving a linear MPC problem each
//! cycle:
//!
//! 1. Match the vehicle to the course and extract the reference window
//!    ([`tracker`]).
//! 2. Iteratively linearise the bicycle dynamics and solve the QP until the
//!    control sequence settles ([`refine`], [`solver`]).
//! 3. Issue the first command of the optimal sequence and keep the rest as
//!    the warm start for the next cycle.
//!
//! The module finishes once the vehicle is stopped at the goal, or when the
//! tracking time ceiling is exceeded.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
pub mod refine;
pub mod solver;
pub mod tracker;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, warn};
use serde::Serialize;

// Internal
use crate::course::Course;
use crate::vehicle::{CtrlCmd, VehicleModel, VehicleState};
use util::maths::wrap_near;
use util::params::LoadError;

pub use self::params::Params;
use self::refine::{refine_controls, ControlSequence, RefineOutcome};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// MPC controller state.
pub struct MpcCtrl {
    /// Control parameters
    params: Params,

    /// Vehicle model shared by the predictor and the optimiser
    model: VehicleModel,

    /// The course being tracked
    course: Option<Course>,

    /// Speed profile aligned with the course samples
    profile: Vec<f64>,

    /// Course index matched on the previous cycle. The nearest-point
    /// search never moves behind this.
    target_ind: usize,

    /// Control sequence from the previous cycle, used to warm start the
    /// refinement
    warm_start: Option<ControlSequence>,

    /// Time spent tracking the current course
    elapsed_s: f64,

    /// Current mode
    mode: MpcCtrlMode,

    /// Whether the finished state was entered by reaching the goal, as
    /// opposed to running out of time
    goal_reached: bool,
}

/// Status of one control cycle, for logging and telemetry.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StatusReport {
    /// Course index the vehicle was matched to
    pub target_ind: usize,

    /// Signed Euclidean distance to the matched course sample, positive
    /// when the vehicle lies to the left of the course heading there.
    /// Includes the along-track offset to the sample, so on a coarsely
    /// sampled course it is bounded below by half the sample spacing, not
    /// by the lateral deviation.
    pub nearest_dist_m: f64,

    /// Number of refinement solves this cycle
    pub refine_iters: usize,

    /// Whether the refinement converged (false when the cap was hit)
    pub converged: bool,

    /// Whether the QP solve failed this cycle
    pub solve_failed: bool,

    /// Whether the vehicle has stopped at the goal
    pub goal_reached: bool,

    /// Whether tracking was abandoned because the time ceiling passed
    pub time_limit_exceeded: bool,

    /// Time spent tracking the current course
    pub elapsed_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Operating mode of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpcCtrlMode {
    /// No course loaded
    Off,

    /// Tracking a course
    Tracking,

    /// Stopped at the goal or out of time; no further commands are issued
    Finished,
}

/// Errors that can occur in the MPC control module.
#[derive(Debug, thiserror::Error)]
pub enum MpcCtrlError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(#[from] LoadError),

    #[error("Cannot process a cycle without a course loaded")]
    NoCourse,

    #[error("A course is already loaded, abort it first")]
    CourseAlreadyLoaded,

    #[error("The speed profile has {got} entries but the course has {expected} samples")]
    ProfileMismatch { expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MpcCtrl {
    /// Create a new controller from already-loaded parameters.
    pub fn new(params: Params, vehicle_params: crate::vehicle::Params) -> Self {
        Self {
            params,
            model: VehicleModel::new(vehicle_params),
            course: None,
            profile: Vec::new(),
            target_ind: 0,
            warm_start: None,
            elapsed_s: 0.0,
            mode: MpcCtrlMode::Off,
            goal_reached: false,
        }
    }

    /// Initialise the controller from parameter files.
    pub fn init(
        mpc_params_path: &str,
        vehicle_params_path: &str,
    ) -> Result<Self, MpcCtrlError> {
        let params: Params = util::params::load(mpc_params_path)?;
        let vehicle_params: crate::vehicle::Params = util::params::load(vehicle_params_path)?;

        Ok(Self::new(params, vehicle_params))
    }

    /// Access the control parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Access the vehicle model.
    pub fn model(&self) -> &VehicleModel {
        &self.model
    }

    /// Get the current mode.
    pub fn mode(&self) -> MpcCtrlMode {
        self.mode
    }

    /// Load a course and its speed profile and start tracking.
    pub fn set_course(&mut self, course: Course, profile: Vec<f64>) -> Result<(), MpcCtrlError> {
        if self.course.is_some() {
            return Err(MpcCtrlError::CourseAlreadyLoaded);
        }
        if profile.len() != course.num_points() {
            return Err(MpcCtrlError::ProfileMismatch {
                expected: course.num_points(),
                got: profile.len(),
            });
        }

        info!(
            "Tracking a course of {} samples, {:.1} m long",
            course.num_points(),
            course.s_m.last().copied().unwrap_or(0.0)
        );

        self.course = Some(course);
        self.profile = profile;
        self.target_ind = 0;
        self.warm_start = None;
        self.elapsed_s = 0.0;
        self.goal_reached = false;
        self.mode = MpcCtrlMode::Tracking;

        Ok(())
    }

    /// Abort the current course and return to [`MpcCtrlMode::Off`].
    pub fn abort(&mut self) {
        self.course = None;
        self.profile.clear();
        self.warm_start = None;
        self.goal_reached = false;
        self.mode = MpcCtrlMode::Off;
    }

    /// Shift a measured heading by whole turns so it agrees with the start
    /// of the loaded course.
    ///
    /// The course headings are unwrapped, so a raw `[-pi, pi)` measurement
    /// could start a whole turn away from them and the controller would
    /// "unwind" it through a full spin. Call this once on the initial state
    /// before the first cycle.
    pub fn align_heading(&self, state: &VehicleState) -> Result<VehicleState, MpcCtrlError> {
        let course = self.course.as_ref().ok_or(MpcCtrlError::NoCourse)?;

        Ok(VehicleState {
            yaw_rad: wrap_near(state.yaw_rad, course.yaw_rad[0]),
            ..*state
        })
    }

    /// Process one control cycle.
    ///
    /// Returns the command to apply, or `None` when no command could be
    /// produced this cycle (solve failure, or the controller is not
    /// tracking). On a solve failure the caller should hold its last
    /// command; the next cycle re-seeds the refinement from zero.
    pub fn proc(
        &mut self,
        state: &VehicleState,
    ) -> Result<(Option<CtrlCmd>, StatusReport), MpcCtrlError> {
        let mut report = StatusReport {
            elapsed_s: self.elapsed_s,
            ..Default::default()
        };

        match self.mode {
            MpcCtrlMode::Off => return Err(MpcCtrlError::NoCourse),
            MpcCtrlMode::Finished => {
                report.goal_reached = self.goal_reached;
                report.time_limit_exceeded = !self.goal_reached;
                return Ok((None, report));
            }
            MpcCtrlMode::Tracking => (),
        }

        let course = self.course.as_ref().ok_or(MpcCtrlError::NoCourse)?;

        let (window, ind, nearest_dist_m) = tracker::ref_window(
            state.x_m,
            state.y_m,
            state.speed_ms,
            course,
            &self.profile,
            &self.params,
            self.target_ind,
        );

        self.target_ind = ind;
        report.target_ind = ind;
        report.nearest_dist_m = nearest_dist_m;

        let cmd = match refine_controls(
            state,
            &window,
            self.warm_start.take(),
            &self.model,
            &self.params,
        ) {
            Ok((solution, outcome)) => {
                let sequence = ControlSequence::from(&solution);
                let cmd = sequence.first();
                self.warm_start = Some(sequence);

                match outcome {
                    RefineOutcome::Converged { iters } => {
                        report.refine_iters = iters;
                        report.converged = true;
                    }
                    RefineOutcome::IterLimit => {
                        report.refine_iters = self.params.max_refine_iters;
                        report.converged = false;
                    }
                }

                Some(cmd)
            }
            Err(e) => {
                // Not fatal: skip this cycle and cold start the next one
                warn!("MPC solve failed, no command this cycle: {}", e);
                report.solve_failed = true;
                None
            }
        };

        self.elapsed_s += self.params.dt_s;
        report.elapsed_s = self.elapsed_s;

        // The goal is only checked after the command is produced, so the
        // final braking command of the run is still emitted below
        if self.check_goal(state) {
            info!(
                "Goal reached after {:.1} s of tracking",
                self.elapsed_s
            );
            report.goal_reached = true;
            self.goal_reached = true;
            self.mode = MpcCtrlMode::Finished;
            return Ok((cmd, report));
        }

        if self.elapsed_s > self.params.max_time_s {
            warn!(
                "Tracking time ceiling ({} s) exceeded before the goal",
                self.params.max_time_s
            );
            report.time_limit_exceeded = true;
            self.mode = MpcCtrlMode::Finished;
            return Ok((None, report));
        }

        Ok((cmd, report))
    }

    /// Check whether the vehicle has finished the course.
    ///
    /// All three conditions must hold independently: near the goal,
    /// matched near the end of the course, and stopped.
    fn check_goal(&self, state: &VehicleState) -> bool {
        let course = match &self.course {
            Some(c) => c,
            None => return false,
        };

        let goal = course.goal();
        let dx = state.x_m - goal[0];
        let dy = state.y_m - goal[1];
        let near_goal = (dx * dx + dy * dy).sqrt() <= self.params.goal_dist_m;

        let index_lag = course.num_points() - 1 - self.target_ind;
        let near_end = index_lag < self.params.goal_index_lag;

        let stopped = state.speed_ms.abs() <= self.params.stop_speed_ms;

        near_goal && near_end && stopped
    }
}

// ---------------------------------------------------------------------------
// TEST UTILITIES
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_utils {
    use super::Params;
    use crate::vehicle;

    /// Control parameters used across the module's tests.
    pub fn test_mpc_params() -> Params {
        Params {
            horizon: 5,
            dt_s: 0.2,
            state_cost: [1.0, 1.0, 0.5, 0.5],
            terminal_cost: [1.0, 1.0, 0.5, 0.5],
            input_cost: [0.01, 0.01],
            input_rate_cost: [0.01, 1.0],
            max_refine_iters: 3,
            du_threshold: 0.1,
            max_solver_iters: 200,
            search_window: 10,
            target_speed_ms: 2.0,
            course_sep_m: 1.0,
            goal_dist_m: 1.5,
            stop_speed_ms: 0.1,
            goal_index_lag: 5,
            max_time_s: 500.0,
        }
    }

    /// Vehicle parameters used across the module's tests.
    pub fn test_vehicle_params() -> vehicle::Params {
        vehicle::Params {
            wheelbase_m: 2.5,
            max_steer_rad: 45.0_f64.to_radians(),
            max_steer_rate_rads: 30.0_f64.to_radians(),
            max_speed_ms: 5.0,
            min_speed_ms: -5.0,
            max_accel_ms2: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::test_utils::{test_mpc_params, test_vehicle_params};
    use super::*;
    use nalgebra::Vector2;

    fn straight_course() -> (Course, Vec<f64>) {
        let wps: Vec<Vector2<f64>> =
            (0..5).map(|i| Vector2::new(10.0 * i as f64, 0.0)).collect();
        let course = Course::from_waypoints(&wps, 1.0).unwrap();
        let profile = crate::course::profile::speed_profile(&course, 2.0);
        (course, profile)
    }

    fn tracking_ctrl() -> MpcCtrl {
        let mut ctrl = MpcCtrl::new(test_mpc_params(), test_vehicle_params());
        let (course, profile) = straight_course();
        ctrl.set_course(course, profile).unwrap();
        ctrl
    }

    #[test]
    fn proc_without_course_is_an_error() {
        let mut ctrl = MpcCtrl::new(test_mpc_params(), test_vehicle_params());
        let result = ctrl.proc(&VehicleState::default());
        assert!(matches!(result, Err(MpcCtrlError::NoCourse)));
    }

    #[test]
    fn second_course_rejected_until_abort() {
        let mut ctrl = tracking_ctrl();
        let (course, profile) = straight_course();

        assert!(matches!(
            ctrl.set_course(course.clone(), profile.clone()),
            Err(MpcCtrlError::CourseAlreadyLoaded)
        ));

        ctrl.abort();
        assert_eq!(ctrl.mode(), MpcCtrlMode::Off);
        ctrl.set_course(course, profile).unwrap();
        assert_eq!(ctrl.mode(), MpcCtrlMode::Tracking);
    }

    #[test]
    fn profile_length_checked() {
        let mut ctrl = MpcCtrl::new(test_mpc_params(), test_vehicle_params());
        let (course, _) = straight_course();

        assert!(matches!(
            ctrl.set_course(course, vec![1.0, 2.0]),
            Err(MpcCtrlError::ProfileMismatch { .. })
        ));
    }

    #[test]
    fn first_cycle_accelerates_along_a_straight_course() {
        let mut ctrl = tracking_ctrl();

        let state = VehicleState::default();
        let (cmd, report) = ctrl.proc(&state).unwrap();

        let cmd = cmd.expect("a command on a healthy cycle");
        assert!(cmd.accel_ms2 > 0.0);
        assert!(!report.goal_reached);
        assert!(!report.solve_failed);
    }

    #[test]
    fn align_heading_removes_whole_turns() {
        let ctrl = tracking_ctrl();

        let state = VehicleState {
            yaw_rad: std::f64::consts::TAU + 0.1,
            ..Default::default()
        };

        let aligned = ctrl.align_heading(&state).unwrap();
        assert!((aligned.yaw_rad - 0.1).abs() < 1e-12);
    }

    #[test]
    fn goal_tick_still_emits_a_command() {
        let mut ctrl = tracking_ctrl();
        let goal = ctrl.course.as_ref().unwrap().goal();
        let n = ctrl.course.as_ref().unwrap().num_points();

        // Stopped on the goal, matched near the end of the course
        ctrl.target_ind = n - 2;
        let at_goal = VehicleState {
            x_m: goal[0],
            y_m: goal[1],
            yaw_rad: 0.0,
            speed_ms: 0.0,
        };

        let (cmd, report) = ctrl.proc(&at_goal).unwrap();
        assert!(report.goal_reached);
        assert!(cmd.is_some(), "the goal cycle must still emit its command");
        assert_eq!(ctrl.mode(), MpcCtrlMode::Finished);

        // Later cycles issue nothing
        let (cmd, report) = ctrl.proc(&at_goal).unwrap();
        assert!(cmd.is_none());
        assert!(report.goal_reached);
    }

    // The goal predicate needs all of its conditions at once; each test
    // below breaks exactly one of them.

    #[test]
    fn goal_needs_distance_index_and_stop() {
        let mut ctrl = tracking_ctrl();
        let goal = ctrl.course.as_ref().unwrap().goal();
        let n = ctrl.course.as_ref().unwrap().num_points();

        ctrl.target_ind = n - 1;
        let at_goal = VehicleState {
            x_m: goal[0],
            y_m: goal[1],
            yaw_rad: 0.0,
            speed_ms: 0.0,
        };
        assert!(ctrl.check_goal(&at_goal));
    }

    #[test]
    fn goal_not_reached_when_far_away() {
        let mut ctrl = tracking_ctrl();
        let n = ctrl.course.as_ref().unwrap().num_points();

        ctrl.target_ind = n - 1;
        let far = VehicleState {
            x_m: 0.0,
            y_m: 0.0,
            yaw_rad: 0.0,
            speed_ms: 0.0,
        };
        assert!(!ctrl.check_goal(&far));
    }

    #[test]
    fn goal_not_reached_while_moving() {
        let mut ctrl = tracking_ctrl();
        let goal = ctrl.course.as_ref().unwrap().goal();
        let n = ctrl.course.as_ref().unwrap().num_points();

        ctrl.target_ind = n - 1;
        let moving = VehicleState {
            x_m: goal[0],
            y_m: goal[1],
            yaw_rad: 0.0,
            speed_ms: 1.0,
        };
        assert!(!ctrl.check_goal(&moving));
    }

    #[test]
    fn goal_not_reached_when_match_lags_behind() {
        let mut ctrl = tracking_ctrl();
        let goal = ctrl.course.as_ref().unwrap().goal();

        // Matched far from the end, e.g. on a course that loops back past
        // its own goal
        ctrl.target_ind = 0;
        let at_goal = VehicleState {
            x_m: goal[0],
            y_m: goal[1],
            yaw_rad: 0.0,
            speed_ms: 0.0,
        };
        assert!(!ctrl.check_goal(&at_goal));
    }
}

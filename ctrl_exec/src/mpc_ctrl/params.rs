//! MPC control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for MPC control
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Horizon length in steps (T). State trajectories span T + 1 samples.
    pub horizon: usize,

    /// Control period, which is also the horizon discretisation step
    pub dt_s: f64,

    /// State tracking cost diagonal, ordered [x, y, v, yaw]
    pub state_cost: [f64; 4],

    /// Terminal state tracking cost diagonal, ordered [x, y, v, yaw]
    pub terminal_cost: [f64; 4],

    /// Input cost diagonal, ordered [accel, steer]
    pub input_cost: [f64; 2],

    /// Input rate-of-change cost diagonal, ordered [accel, steer]
    pub input_rate_cost: [f64; 2],

    /// Maximum number of linearise-solve refinement iterations per cycle
    pub max_refine_iters: usize,

    /// Refinement stops once the summed absolute control change between
    /// iterations drops to this value or below
    pub du_threshold: f64,

    /// Maximum interior-point iterations for one QP solve. Bounds the time
    /// spent in a single solve so a cycle cannot hang.
    pub max_solver_iters: u32,

    /// Number of course samples ahead of the previous match searched for
    /// the nearest point
    pub search_window: usize,

    /// Target speed used to build the speed profile
    pub target_speed_ms: f64,

    /// Course sample spacing
    pub course_sep_m: f64,

    /// Distance to the course end below which the goal may be declared
    pub goal_dist_m: f64,

    /// Speed magnitude below which the vehicle counts as stopped
    pub stop_speed_ms: f64,

    /// The goal is only declared when the tracked course index is within
    /// this many samples of the final index
    pub goal_index_lag: usize,

    /// Absolute ceiling on tracking time; the loop finishes when exceeded
    pub max_time_s: f64,
}

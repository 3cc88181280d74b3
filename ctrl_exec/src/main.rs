//! Main controller executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules
//!     - Build the course from the waypoint file
//!     - Main loop:
//!         - MPC control processing
//!         - Vehicle simulation step
//!
//! The vehicle is simulated with the same bicycle model the controller
//! predicts with, advanced by one control period each cycle. On cycles
//! where the optimiser produces no command the last command is held, which
//! is what a real drive train would do if no new demand arrived.
//!
//! At the end of the run the full state and command history is saved into
//! the session directory for offline analysis.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{info, warn};
use serde::Serialize;
use std::env;
use std::time::Instant;

// Internal
use ctrl_lib::{
    course::{profile::speed_profile, Course},
    mpc_ctrl::{MpcCtrl, MpcCtrlMode, StatusReport},
    vehicle::{CtrlCmd, VehicleState},
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Waypoint file used when none is given on the command line.
const DEFAULT_WAYPOINT_FILE: &str = "data/waypoints.csv";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One record of the run history saved at the end of the session.
#[derive(Debug, Clone, Copy, Serialize)]
struct HistoryRecord {
    time_s: f64,
    state: VehicleState,
    cmd: CtrlCmd,
    status: StatusReport,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("ctrl_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    info!("Waypoint MPC Controller Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- INITIALISE MODULES ----

    let mut mpc_ctrl = MpcCtrl::init("mpc_ctrl.toml", "vehicle.toml")
        .wrap_err("Failed to initialise the MPC control module")?;

    info!("MPC control module initialised");

    // ---- BUILD THE COURSE ----

    let waypoint_file = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_WAYPOINT_FILE.into());

    let waypoints =
        Course::load_waypoints(&waypoint_file).wrap_err("Failed to load the waypoint file")?;

    info!("{} waypoints loaded from {:?}", waypoints.len(), waypoint_file);

    let params = mpc_ctrl.params().clone();

    let course = Course::from_waypoints(&waypoints, params.course_sep_m)
        .wrap_err("Failed to build the course")?;
    let profile = speed_profile(&course, params.target_speed_ms);

    // Keep the sampled course next to the run history for offline analysis
    session
        .save("course.json", &course)
        .wrap_err("Failed to save the course")?;

    // ---- START TRACKING ----

    // The vehicle starts at the first course sample, pointing along it
    let initial = VehicleState {
        x_m: course.x_m[0],
        y_m: course.y_m[0],
        yaw_rad: course.yaw_rad[0],
        speed_ms: 0.0,
    };

    mpc_ctrl
        .set_course(course, profile)
        .map_err(|e| eyre!("Failed to load the course into the controller: {}", e))?;

    let mut state = mpc_ctrl
        .align_heading(&initial)
        .map_err(|e| eyre!("Failed to align the initial heading: {}", e))?;

    // ---- MAIN LOOP ----

    let mut cmd = CtrlCmd::default();
    let mut history: Vec<HistoryRecord> = Vec::new();
    let mut time_s = 0.0;

    loop {
        let cycle_start = Instant::now();

        let (new_cmd, status) = mpc_ctrl
            .proc(&state)
            .map_err(|e| eyre!("MPC control processing failed: {}", e))?;

        // The controller must fit inside one control period to be viable on
        // a real platform, even though the simulation does not sleep
        let cycle_dur_s = cycle_start.elapsed().as_secs_f64();
        if cycle_dur_s > params.dt_s {
            warn!(
                "Cycle overran the control period: {:.3} s > {:.3} s",
                cycle_dur_s, params.dt_s
            );
        }

        // Hold the previous command on cycles with no new one
        if let Some(new_cmd) = new_cmd {
            cmd = new_cmd;
        }

        history.push(HistoryRecord {
            time_s,
            state,
            cmd,
            status,
        });

        if mpc_ctrl.mode() == MpcCtrlMode::Finished {
            if status.goal_reached {
                info!("Vehicle stopped at the goal after {:.1} s", time_s);
            } else {
                warn!("Tracking abandoned after {:.1} s without reaching the goal", time_s);
            }
            break;
        }

        // Advance the simulated vehicle by one control period
        state = mpc_ctrl.model().step(&state, &cmd, params.dt_s);
        time_s += params.dt_s;
    }

    // ---- SAVE THE RUN HISTORY ----

    session
        .save("history.json", &history)
        .wrap_err("Failed to save the run history")?;

    info!("Run history saved ({} records)", history.len());

    Ok(())
}

//! # Controller library
//!
//! Core of the waypoint MPC path-tracking controller. The library is split
//! into modules mirroring the processing chain:
//!
//! 1. A waypoint file is fitted with a cubic spline course ([`course`]),
//!    which also assigns a signed speed profile to each course sample.
//! 2. Each control cycle the current vehicle state is matched against the
//!    course and a receding-horizon reference window is built
//!    ([`mpc_ctrl::tracker`]).
//! 3. A quadratic program linearised about a nominal trajectory of the
//!    bicycle model ([`vehicle`]) is solved iteratively
//!    ([`mpc_ctrl::solver`], [`mpc_ctrl::refine`]) and the first
//!    acceleration/steer pair of the solution is commanded.
//!
//! The [`mpc_ctrl::MpcCtrl`] module orchestrates one cycle of this chain.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Course module - spline fitting, course sampling and speed profiling
pub mod course;

/// MPC control module - keeps the vehicle on the course
pub mod mpc_ctrl;

/// Vehicle module - kinematic bicycle model and its linearisation
pub mod vehicle;

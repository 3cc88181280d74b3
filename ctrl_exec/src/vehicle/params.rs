//! Vehicle model parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the kinematic bicycle model, including the actuator limits
/// enforced by both the model and the optimiser.
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Distance between the front and rear axles
    pub wheelbase_m: f64,

    /// Maximum steering angle magnitude
    pub max_steer_rad: f64,

    /// Maximum steering rate magnitude
    pub max_steer_rate_rads: f64,

    /// Maximum speed
    pub max_speed_ms: f64,

    /// Minimum speed (0 forbids reversing, negative allows it)
    pub min_speed_ms: f64,

    /// Maximum acceleration magnitude
    pub max_accel_ms2: f64,
}

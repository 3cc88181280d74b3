//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::f64::consts::{PI, TAU};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Wrap an angle into the range [-pi, pi).
pub fn wrap_pi(angle_rad: f64) -> f64 {
    (angle_rad + PI).rem_euclid(TAU) - PI
}

/// Shift an angle by whole turns so that it lies within pi of a reference
/// angle.
///
/// Used to avoid a spurious 2pi discontinuity between a measured heading and
/// the heading of the path it should follow.
pub fn wrap_near(angle_rad: f64, reference_rad: f64) -> f64 {
    let mut out = angle_rad;
    while out - reference_rad >= PI {
        out -= TAU;
    }
    while out - reference_rad <= -PI {
        out += TAU;
    }
    out
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_pi() {
        assert!((wrap_pi(0.0)).abs() < 1e-12);
        assert!((wrap_pi(TAU) - 0.0).abs() < 1e-12);
        assert!((wrap_pi(PI + 0.1) - (-PI + 0.1)).abs() < 1e-12);
        assert!((wrap_pi(-PI - 0.1) - (PI - 0.1)).abs() < 1e-12);
        // -pi maps to -pi (range is half open at +pi)
        assert!((wrap_pi(-PI) - (-PI)).abs() < 1e-12);
    }

    #[test]
    fn test_wrap_near() {
        // Already close, unchanged
        assert!((wrap_near(0.1, 0.0) - 0.1).abs() < 1e-12);
        // A full turn away comes back
        assert!((wrap_near(0.1 + TAU, 0.0) - 0.1).abs() < 1e-12);
        assert!((wrap_near(0.1 - TAU, 0.0) - 0.1).abs() < 1e-12);
        // Just over the pi boundary
        assert!((wrap_near(PI + 0.2, 0.0) - (PI + 0.2 - TAU)).abs() < 1e-12);
    }
}
